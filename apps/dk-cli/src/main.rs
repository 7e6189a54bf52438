use clap::{Parser, Subcommand, ValueEnum};
use dk_app::{
    AppError, AppResult, SolveRequest, after_transient, list_labels, list_models, load_model,
    model_info, solve, summary,
};
use dk_core::{Real, Value};
use dk_model::{
    CollectionKind, Family, Solution, SystemDef, TimeSpan, ValidateOptions, codec, enumerate,
    find_by_name, validate_with,
};
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "dk-cli")]
#[command(about = "dynkit CLI - ODE, DDE and SDE system descriptions", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum Format {
    Json,
    Yaml,
}

#[derive(Subcommand)]
enum Commands {
    /// List built-in models
    Models,
    /// Validate a model and print its normalized description
    Validate {
        /// Model name (see `models`)
        model: String,
        /// Also call every function once to check its output shape
        #[arg(long)]
        diagnostic: bool,
        #[arg(long, value_enum, default_value = "yaml")]
        format: Format,
    },
    /// List the solvers a model declares, in default order
    Solvers {
        model: String,
    },
    /// Show every entry of a model with its value and limits
    Inspect {
        model: String,
    },
    /// Solve a model and export the trajectory as CSV
    Solve {
        model: String,
        /// Solver name (defaults to the first declared solver)
        #[arg(long)]
        solver: Option<String>,
        /// Force a solver family: ode, dde or sde
        #[arg(long)]
        family: Option<Family>,
        /// Override the start of the time span
        #[arg(long)]
        t0: Option<Real>,
        /// Override the end of the time span
        #[arg(long)]
        tf: Option<Real>,
        /// Edit an entry before solving, e.g. `k=3`, `var:y=0.5` or `A=1,0;0,1`
        #[arg(long = "set", value_name = "ASSIGNMENT", value_parser = parse_assignment)]
        sets: Vec<Assignment>,
        /// Drop samples before the model's transient cutoff `tval`
        #[arg(long)]
        skip_transient: bool,
        /// Output CSV file path (optional, defaults to stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn main() -> AppResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Models => cmd_models(),
        Commands::Validate {
            model,
            diagnostic,
            format,
        } => cmd_validate(&model, diagnostic, format),
        Commands::Solvers { model } => cmd_solvers(&model),
        Commands::Inspect { model } => cmd_inspect(&model),
        Commands::Solve {
            model,
            solver,
            family,
            t0,
            tf,
            sets,
            skip_transient,
            output,
        } => cmd_solve(
            &model,
            solver.as_deref(),
            family,
            (t0, tf),
            &sets,
            skip_transient,
            output.as_deref(),
        ),
    }
}

fn cmd_models() -> AppResult<()> {
    println!("Built-in models:");
    for info in list_models() {
        println!("  {:<20} {}  {}", info.name, info.family, info.description);
    }
    Ok(())
}

fn cmd_validate(model: &str, diagnostic: bool, format: Format) -> AppResult<()> {
    let raw = dk_app::raw_model(model)?;
    let sys = validate_with(&raw, &ValidateOptions { diagnostic })?;
    let text = match format {
        Format::Json => serde_json::to_string_pretty(&sys.data)
            .map_err(|e| AppError::InvalidInput(e.to_string()))?,
        Format::Yaml => {
            serde_yaml::to_string(&sys.data).map_err(|e| AppError::InvalidInput(e.to_string()))?
        }
    };
    println!("{text}");
    eprintln!("✓ {model} is valid");
    Ok(())
}

fn cmd_solvers(model: &str) -> AppResult<()> {
    let sys = load_model(model)?;
    for (i, entry) in enumerate(&sys).iter().enumerate() {
        let marker = if i == 0 { " (default)" } else { "" };
        println!("  {:<20} {}{}", entry.name, entry.family.field(), marker);
    }
    Ok(())
}

fn cmd_inspect(model: &str) -> AppResult<()> {
    let info = model_info(model)?;
    let sys = load_model(model)?;
    println!("{} - {}", info.name, info.description);
    println!(
        "  tspan: [{}, {}]  tval: {}",
        sys.data.tspan.t0, sys.data.tspan.tf, sys.data.tval
    );

    for kind in CollectionKind::ALL {
        let collection = sys.collection(kind);
        if collection.is_empty() {
            continue;
        }
        println!("\n{}:", kind.field());
        let map = codec::index_map(collection);
        for entry in &collection.entries {
            let bounds = entry.bounds_or_default();
            let rows = map
                .rows_of(&entry.name)
                .map(|r| format!("rows {}..{}", r.start, r.end))
                .unwrap_or_default();
            println!(
                "  {:<10} {:<24} lim [{}, {}]  {}",
                entry.name,
                entry.value.to_string(),
                bounds.min,
                bounds.max,
                rows
            );
        }
    }
    Ok(())
}

/// `--set` argument: `name=value` or `kind:name=value`.
#[derive(Clone, Debug)]
struct Assignment {
    kind: Option<CollectionKind>,
    name: String,
    value: Value,
}

fn parse_assignment(text: &str) -> Result<Assignment, String> {
    let (target, value) = text
        .split_once('=')
        .ok_or_else(|| format!("expected name=value, got '{text}'"))?;
    let value: Value = value.parse().map_err(|e| format!("'{value}': {e}"))?;
    let (kind, name) = match target.split_once(':') {
        Some(("par", name)) => (Some(CollectionKind::Par), name),
        Some(("var", name)) => (Some(CollectionKind::Var), name),
        Some(("lag", name)) => (Some(CollectionKind::Lag), name),
        Some((other, _)) => {
            return Err(format!("unknown collection '{other}' (use par, var or lag)"));
        }
        None => (None, target),
    };
    Ok(Assignment {
        kind,
        name: name.to_string(),
        value,
    })
}

/// Apply an assignment. Without a kind the entry is looked up in pardef,
/// vardef and lagdef, in that order.
fn apply(sys: &SystemDef, assignment: &Assignment) -> AppResult<SystemDef> {
    let kind = match assignment.kind {
        Some(kind) => kind,
        None => [CollectionKind::Par, CollectionKind::Var, CollectionKind::Lag]
            .into_iter()
            .find(|kind| sys.collection(*kind).get(&assignment.name).is_some())
            .ok_or_else(|| {
                AppError::InvalidInput(format!("no entry named '{}'", assignment.name))
            })?,
    };
    info!(collection = kind.field(), name = %assignment.name, "entry edited");
    Ok(sys.set(kind, &assignment.name, assignment.value.clone())?)
}

fn cmd_solve(
    model: &str,
    solver: Option<&str>,
    family: Option<Family>,
    (t0, tf): (Option<Real>, Option<Real>),
    sets: &[Assignment],
    skip_transient: bool,
    output: Option<&Path>,
) -> AppResult<()> {
    let mut sys = load_model(model)?;
    for assignment in sets {
        sys = apply(&sys, assignment)?;
    }

    let solver = match solver {
        Some(name) => Some(
            find_by_name(&sys, name, family)
                .ok_or_else(|| AppError::unsupported_solver(name, "not declared by this model"))?
                .handle,
        ),
        None => None,
    };
    let declared = sys.data.tspan;
    let tspan = (t0.is_some() || tf.is_some())
        .then(|| TimeSpan::new(t0.unwrap_or(declared.t0), tf.unwrap_or(declared.tf)));
    let request = SolveRequest {
        tspan,
        solver,
        family,
        ..SolveRequest::default()
    };

    let mut solution = solve(&sys, &request)?;
    if skip_transient {
        solution = after_transient(&solution, sys.data.tval)?;
    }

    let s = summary(&solution)?;
    eprintln!(
        "✓ Solved {} with {} ({}): {} samples over [{:.3}, {:.3}]",
        model, s.solver, s.family, s.sample_count, s.time_range.0, s.time_range.1
    );
    if let Some(reason) = &s.aux_error {
        eprintln!("  auxiliary outputs unavailable: {reason}");
    }

    let csv = to_csv(&solution);
    if let Some(path) = output {
        std::fs::write(path, csv)?;
        eprintln!("✓ Exported {} rows to {}", solution.len(), path.display());
    } else {
        print!("{csv}");
    }
    Ok(())
}

fn to_csv(solution: &Solution) -> String {
    let mut csv = String::from("t");
    for label in list_labels(solution) {
        csv.push(',');
        csv.push_str(&label);
    }
    csv.push('\n');

    for (j, t) in solution.t.iter().enumerate() {
        csv.push_str(&t.to_string());
        for x in solution.y.column(j).iter() {
            csv.push_str(&format!(",{x}"));
        }
        if let Some(aux) = &solution.aux {
            for x in aux.column(j).iter() {
                csv.push_str(&format!(",{x}"));
            }
        }
        csv.push('\n');
    }
    csv
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assignments_parse_with_and_without_kind() {
        let a = parse_assignment("k=3").unwrap();
        assert_eq!(a.kind, None);
        assert_eq!(a.name, "k");
        assert_eq!(a.value, Value::scalar(3.0));

        let a = parse_assignment("var:theta=1,2;3,4").unwrap();
        assert_eq!(a.kind, Some(CollectionKind::Var));
        assert_eq!(a.value.numel(), 4);

        assert!(parse_assignment("k").is_err());
        assert!(parse_assignment("aux:R=1").is_err());
        assert!(parse_assignment("k=abc").is_err());
    }

    #[test]
    fn unqualified_assignment_finds_the_collection() {
        let sys = load_model("hutchinson").unwrap();
        let edited = apply(&sys, &parse_assignment("tau=0.5").unwrap()).unwrap();
        assert_eq!(
            edited.get(CollectionKind::Lag, "tau"),
            Some(&Value::scalar(0.5))
        );
        assert!(apply(&sys, &parse_assignment("nope=1").unwrap()).is_err());
    }

    #[test]
    fn negative_lag_assignment_is_rejected_before_solving() {
        let sys = load_model("hutchinson").unwrap();
        for text in ["lag:tau=-1", "tau=-1"] {
            let err = apply(&sys, &parse_assignment(text).unwrap()).unwrap_err();
            assert!(err.to_string().contains("non-negative"), "{text}: {err}");
        }
    }

    #[test]
    fn non_finite_assignment_is_rejected() {
        assert!(parse_assignment("k=NaN").is_err());
        assert!(parse_assignment("k=inf").is_err());

        let sys = load_model("linear").unwrap();
        let assignment = Assignment {
            kind: Some(CollectionKind::Par),
            name: "k".to_string(),
            value: Value::scalar(f64::INFINITY),
        };
        assert!(apply(&sys, &assignment).is_err());
    }

    #[test]
    fn csv_has_a_header_and_one_line_per_sample() {
        let sys = load_model("kuramoto").unwrap();
        let sol = solve(&sys, &SolveRequest::default()).unwrap();
        let csv = to_csv(&sol);
        let mut lines = csv.lines();
        assert_eq!(
            lines.next(),
            Some("t,theta_1,theta_2,theta_3,theta_4,theta_5,R")
        );
        assert_eq!(lines.count(), sol.len());
    }
}
