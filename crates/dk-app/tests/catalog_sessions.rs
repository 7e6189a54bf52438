//! Built-in models driven through sessions and the background worker.

use std::time::Duration;

use dk_core::Value;
use dk_model::{CollectionKind, Family, enumerate};

use dk_app::{
    Session, SolveRequest, SolveWorker, WorkerMessage, after_transient, list_labels, list_models,
    load_model, series_by_label, solve, summary,
};

#[test]
fn every_model_solves_with_every_declared_solver() {
    for info in list_models() {
        let sys = load_model(info.name).unwrap();
        for entry in enumerate(&sys) {
            let sol = solve(&sys, &SolveRequest::with_solver(entry.handle.clone()))
                .unwrap_or_else(|e| panic!("{} with {}: {e}", info.name, entry.name));
            assert_eq!(sol.family, info.family);
            assert_eq!(sol.dim(), sys.state_dim());
            assert_eq!(sol.t.last(), Some(&sys.data.tspan.tf));
        }
    }
}

#[test]
fn kuramoto_order_parameter_is_attached() {
    let sys = load_model("kuramoto").unwrap();
    let sol = solve(&sys, &SolveRequest::default()).unwrap();
    let labels = list_labels(&sol);
    assert_eq!(labels.last().map(String::as_str), Some("R"));

    let r = series_by_label(&sol, "R").unwrap();
    assert_eq!(r.len(), sol.len());
    assert!(r.iter().all(|(_, x)| (0.0..=1.0 + 1e-12).contains(x)));
}

#[test]
fn stronger_coupling_synchronises_kuramoto() {
    let mut session = Session::new(load_model("kuramoto").unwrap()).unwrap();
    let late_mean = |session: &Session| {
        let sol = session.solution().unwrap();
        let tail = after_transient(sol, 40.0).unwrap();
        let r = tail.aux.unwrap();
        r.row(0).mean()
    };
    session.set_param("K", Value::scalar(0.0)).unwrap();
    let uncoupled = late_mean(&session);
    session.set_param("K", Value::scalar(5.0)).unwrap();
    let coupled = late_mean(&session);
    assert!(coupled > uncoupled, "{coupled} <= {uncoupled}");
    assert!(coupled > 0.9);
}

#[test]
fn hutchinson_lag_edit_changes_the_trajectory() {
    let mut session = Session::new(load_model("hutchinson").unwrap()).unwrap();
    assert_eq!(session.family(), Family::Dde);
    let before = session.solution().unwrap().final_state().unwrap();

    session.set_lag("tau", Value::scalar(0.5)).unwrap();
    let after = session.solution().unwrap().final_state().unwrap();
    // Short lags settle on the carrying capacity.
    assert!((after[0] - 1.0).abs() < 1e-3, "{after:?}");
    assert_ne!(before, after);

    assert!(session.set_lag("tau", Value::scalar(-1.0)).is_err());
}

#[test]
fn sde_session_keeps_its_noise_across_edits() {
    let mut session = Session::new(load_model("ornstein-uhlenbeck").unwrap()).unwrap();
    assert!(session.seed().is_some());
    let dw_before = session.solution().unwrap().dw.clone().unwrap();

    session.set_param("mu", Value::scalar(0.5)).unwrap();
    let dw_after = session.solution().unwrap().dw.clone().unwrap();
    assert_eq!(dw_before, dw_after);
    assert_eq!(dw_after.nrows(), 2);
}

#[test]
fn halted_session_resumes_with_the_latest_edits() {
    let mut session = Session::new(load_model("fitzhugh-nagumo").unwrap()).unwrap();
    session.set_halt(true).unwrap();
    session.set_param("I", Value::scalar(0.0)).unwrap();
    session
        .set_value(CollectionKind::Var, "V", Value::scalar(0.0))
        .unwrap();
    assert!(session.is_stale());

    session.set_halt(false).unwrap();
    let s = summary(session.solution().unwrap()).unwrap();
    assert_eq!(s.state_count, 2);
    assert_eq!(s.solver, "dopri45");
    assert!(!session.is_stale());
}

#[test]
fn worker_delivers_catalog_solves() {
    let worker = SolveWorker::start();
    let sys = load_model("linear").unwrap();
    let generation = worker.submit(sys, SolveRequest::default()).unwrap();
    match worker.recv_timeout(Duration::from_secs(30)).unwrap() {
        Some(WorkerMessage::Solved {
            generation: g,
            solution,
        }) => {
            assert_eq!(g, generation);
            let y_end = solution.final_state().unwrap()[0];
            assert!((y_end - 2.0_f64.exp()).abs() < 1e-4);
        }
        other => panic!("unexpected worker message: {other:?}"),
    }
}
