//! Dispatch, retry and integration against an in-memory sandbox.

use sectionforge::dom::{DomNode, PageSize};
use sectionforge::geometry::Rect;
use sectionforge::orchestrator::deps::DependencyAction;
use sectionforge::prelude::*;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

fn page_with_blocks(n: usize) -> (DomNode, PageSize) {
    let page = PageSize::new(1200.0, n as f64 * 600.0);
    let children = (0..n)
        .map(|i| {
            DomNode::new("section", Rect::new(0.0, i as f64 * 600.0, 1200.0, 600.0))
                .with_id(format!("block{i}"))
                .with_tokens(1_500)
        })
        .collect();
    (DomNode::new("body", page.bounds()).with_children(children), page)
}

fn site_tasks(n: usize) -> Vec<Task> {
    let (root, page) = page_with_blocks(n);
    let partition = partition(&root, page, &PartitionConfig::default());
    assert_eq!(partition.len(), n);
    build_tasks(
        &partition.sections,
        &SourceContext::new("site.test"),
        &OutputLayout::default(),
    )
}

fn component(task: &Task, attempt: usize) -> String {
    format!(
        "import {{ motion }} from \"framer-motion\";\n\
         // attempt {attempt}\n\
         export default function {}() {{ return <motion.section />; }}\n",
        task.component_name()
    )
}

/// Writes each task's artifact, failing the ids in `flaky` on their first run.
fn flaky_writer(
    sandbox: Arc<MemorySandbox>,
    flaky: &[usize],
) -> (Arc<dyn Worker>, Arc<Mutex<Vec<usize>>>) {
    let calls = Arc::new(Mutex::new(Vec::new()));
    let flaky: HashSet<usize> = flaky.iter().copied().collect();
    let seen = Arc::clone(&calls);
    let worker = FnWorker::new(move |task: Task| {
        let sandbox = Arc::clone(&sandbox);
        let flaky = flaky.clone();
        let calls = Arc::clone(&seen);
        async move {
            let attempt = {
                let mut calls = calls.lock().unwrap();
                calls.push(task.id);
                calls.iter().filter(|id| **id == task.id).count()
            };
            if attempt == 1 && flaky.contains(&task.id) {
                return WorkerResult::failed(task.id, "model refused");
            }
            let content = component(&task, attempt);
            assert!(sandbox.write_file(&task.artifact_path, &content).await);
            WorkerResult::succeeded(task.id).with_file(task.artifact_path.clone(), content)
        }
    });
    (Arc::new(worker), calls)
}

fn sandbox() -> Arc<MemorySandbox> {
    Arc::new(MemorySandbox::new().with_file(
        "package.json",
        r#"{"name": "site", "dependencies": {"react": "^18.2.0"}}"#,
    ))
}

#[tokio::test]
async fn partition_to_preview() {
    let sandbox = sandbox();
    let (worker, _) = flaky_writer(sandbox.clone(), &[]);
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    let handler = FnEventHandler::new(move |event: &BuildEvent<'_>| {
        let label = match event {
            BuildEvent::DispatchStarted { .. } => "dispatch",
            BuildEvent::TaskStarted { .. } => "task_started",
            BuildEvent::TaskFinished { .. } => "task_finished",
            BuildEvent::Integrated { .. } => "integrated",
            BuildEvent::DependencyAction { .. } => "dependency",
            BuildEvent::PreviewRestarted { .. } => "preview",
            BuildEvent::Finished { .. } => "finished",
        };
        sink.lock().unwrap().push(label);
    });
    let orchestrator =
        Orchestrator::new(sandbox.clone(), worker).with_event_handler(Arc::new(handler));

    let summary = orchestrator.dispatch(site_tasks(3), "site.test").await.unwrap();

    assert!(summary.is_success(), "{summary:?}");
    assert_eq!(summary.state, RunState::Integrated);
    assert_eq!(summary.integrated, vec![1, 2, 3]);
    assert!(summary.dependency_actions.iter().any(|a| matches!(
        a,
        DependencyAction::Installed { packages } if packages == &vec!["framer-motion".to_string()]
    )));
    assert!(
        sandbox
            .commands()
            .iter()
            .any(|c| c.starts_with("npm install") && c.contains("framer-motion"))
    );
    let manifest = sandbox.file("package.json").unwrap();
    assert!(manifest.contains("\"framer-motion\": \"latest\""), "{manifest}");

    let app = sandbox.file("src/App.tsx").unwrap();
    let first = app.find("<Section1 />").unwrap();
    let second = app.find("<Section2 />").unwrap();
    let third = app.find("<Section3 />").unwrap();
    assert!(first < second && second < third);
    assert!(sandbox.file("src/index.css").is_some());
    assert_eq!(sandbox.preview_starts(), 1);

    let events = events.lock().unwrap();
    assert_eq!(events.first(), Some(&"dispatch"));
    assert_eq!(events.last(), Some(&"finished"));
    assert_eq!(events.iter().filter(|e| **e == "task_finished").count(), 3);
    let integrated = events.iter().position(|e| *e == "integrated").unwrap();
    let preview = events.iter().position(|e| *e == "preview").unwrap();
    assert!(integrated < preview);
}

#[tokio::test]
async fn concurrent_dispatches_run_once() {
    let sandbox = sandbox();
    let (worker, calls) = flaky_writer(sandbox.clone(), &[]);
    let orchestrator = Orchestrator::new(sandbox, worker);

    let (a, b) = tokio::join!(
        orchestrator.dispatch(site_tasks(2), "site.test"),
        orchestrator.dispatch(site_tasks(2), "site.test"),
    );

    let outcomes = [a, b];
    assert_eq!(outcomes.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(
        outcomes
            .iter()
            .any(|r| matches!(r, Err(BuildError::DispatchRejected(_))))
    );
    assert_eq!(calls.lock().unwrap().len(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_dispatches_across_threads_run_once() {
    let sandbox = sandbox();
    let (worker, calls) = flaky_writer(sandbox.clone(), &[]);
    let orchestrator = Arc::new(Orchestrator::new(sandbox, worker));

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let orchestrator = Arc::clone(&orchestrator);
            tokio::spawn(async move { orchestrator.dispatch(site_tasks(2), "site.test").await })
        })
        .collect();
    let mut ok = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(summary) => {
                assert!(summary.is_success());
                ok += 1;
            }
            Err(BuildError::DispatchRejected(_)) => {}
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    assert_eq!(ok, 1);
    assert_eq!(calls.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn retry_runs_only_the_failed_sections() {
    let sandbox = sandbox();
    let (worker, calls) = flaky_writer(sandbox.clone(), &[2, 4]);
    let orchestrator = Orchestrator::new(sandbox.clone(), worker);

    let first = orchestrator.dispatch(site_tasks(5), "site.test").await.unwrap();
    assert_eq!(first.state, RunState::PartiallyFailed);
    assert_eq!(first.integrated, vec![1, 3, 5]);
    assert_eq!(
        first.next_action.as_deref(),
        Some(r#"retry_sections(source_id="site.test", task_ids=[2, 4])"#)
    );
    let kept: Vec<Option<String>> = [1, 3, 5]
        .iter()
        .map(|id| sandbox.file(&format!("src/sections/section_{id}/index.tsx")))
        .collect();
    assert!(kept.iter().all(Option::is_some));

    let retried = orchestrator.retry("site.test", None).await.unwrap();

    assert_eq!(retried.attempted, vec![2, 4]);
    assert_eq!(retried.state, RunState::Integrated);
    assert_eq!(retried.succeeded, vec![1, 2, 3, 4, 5]);
    assert_eq!(retried.integrated, vec![1, 2, 3, 4, 5]);
    assert!(retried.next_action.is_none());

    let mut ran = calls.lock().unwrap().clone();
    ran.sort_unstable();
    assert_eq!(ran, vec![1, 2, 2, 3, 4, 4, 5]);
    let after: Vec<Option<String>> = [1, 3, 5]
        .iter()
        .map(|id| sandbox.file(&format!("src/sections/section_{id}/index.tsx")))
        .collect();
    assert_eq!(kept, after);

    let app = sandbox.file("src/App.tsx").unwrap();
    for n in 1..=5 {
        assert!(app.contains(&format!("<Section{n} />")), "{app}");
    }

    let err = orchestrator.retry("site.test", None).await.unwrap_err();
    assert!(matches!(err, BuildError::NothingToRetry { .. }));
}

#[tokio::test]
async fn retry_with_explicit_ids_leaves_the_rest_pending() {
    let sandbox = sandbox();
    let (worker, _) = flaky_writer(sandbox.clone(), &[2, 4]);
    let orchestrator = Orchestrator::new(sandbox, worker);
    orchestrator.dispatch(site_tasks(5), "site.test").await.unwrap();

    let summary = orchestrator
        .retry("site.test", Some(&[4, 5][..]))
        .await
        .unwrap();

    assert_eq!(summary.attempted, vec![4]);
    assert_eq!(summary.state, RunState::PartiallyFailed);
    assert_eq!(orchestrator.status("site.test").unwrap().retryable, vec![2]);
}
