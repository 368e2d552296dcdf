use exthost_core::{
    entry_fn, Attribution, DescriptorSource, ExtensionHost, ExtensionResult, HostConfig,
    LoadContext, LoadRecordKind, Panel, SupervisorError,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

struct Sheet(&'static str);

impl Panel for Sheet {
    fn title(&self) -> String {
        self.0.to_string()
    }
}

fn source(name: &str, extra: &str) -> DescriptorSource {
    DescriptorSource::from_text(
        name,
        format!("name = \"{name}\"\ntitle = \"{name}\"\nversion = \"1.0.0\"\n{extra}"),
    )
}

fn noop(_ctx: &mut LoadContext<'_>) -> ExtensionResult {
    Ok(())
}

#[test]
fn load_fault_in_one_extension_leaves_the_others_running() {
    let inits = Arc::new(AtomicUsize::new(0));
    let mut host = ExtensionHost::new(HostConfig::default());
    host.register_entry(
        "a",
        entry_fn(|_ctx: &mut LoadContext<'_>| -> ExtensionResult {
            let values: Vec<u8> = Vec::new();
            if values[3] > 0 {
                return Err("unexpected byte".into());
            }
            Ok(())
        }),
    )
    .expect("register a");
    for name in ["b", "c"] {
        let inits = Arc::clone(&inits);
        host.register_entry(
            name,
            entry_fn(move |_ctx: &mut LoadContext<'_>| {
                inits.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
        )
        .expect("register");
    }

    let supervisor = host.start_with_sources(&[source("a", ""), source("b", ""), source("c", "")]);

    assert_eq!(inits.load(Ordering::SeqCst), 2);
    assert_eq!(supervisor.active_extensions(), ["b".to_string(), "c".to_string()]);

    let diagnostics = host.diagnostics();
    let record = diagnostics.load_record("a").expect("record for a");
    assert_eq!(record.kind(), LoadRecordKind::LoadError);
    assert!(record.summary.starts_with("panicked: index out of bounds"));
    assert!(record.detail().contains("stack backtrace"));

    let failed = diagnostics.failed_extensions();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].extension.as_deref(), Some("a"));
    let detail = diagnostics.detail(failed[0].seq).expect("detail");
    assert!(detail.contains("index out of bounds"));
}

#[test]
fn panel_fault_yields_placeholder_for_that_extension_only() {
    let mut host = ExtensionHost::new(HostConfig::default());
    host.register_entry(
        "x",
        entry_fn(|ctx: &mut LoadContext<'_>| {
            ctx.register_panel("inspector", || -> ExtensionResult<Box<dyn Panel>> {
                Err("palette not initialized".into())
            })
        }),
    )
    .expect("register x");
    host.register_entry(
        "y",
        entry_fn(|ctx: &mut LoadContext<'_>| {
            ctx.register_panel("mixer", || Ok(Box::new(Sheet("Mixer")) as Box<dyn Panel>))
        }),
    )
    .expect("register y");

    let supervisor = host.start_with_sources(&[source("x", ""), source("y", "")]);

    let inspector = supervisor
        .create_panel("x", "inspector")
        .expect("placeholder, not error");
    assert!(inspector.is_placeholder());
    assert!(inspector
        .problem()
        .is_some_and(|problem| problem.contains("palette not initialized")));

    let mixer = supervisor.create_panel("y", "mixer").expect("mixer");
    assert!(!mixer.is_placeholder());
    assert_eq!(mixer.title(), "Mixer");

    let faults = host.diagnostics().runtime_faults();
    assert_eq!(faults.len(), 1);
    assert_eq!(faults[0].extension(), Some("x"));
    assert!(supervisor.is_active("x"));
}

#[test]
fn runtime_fault_is_routed_to_the_maintainer() {
    let mut host = ExtensionHost::new(HostConfig::default());
    host.register_entry(
        "a",
        entry_fn(|ctx: &mut LoadContext<'_>| {
            ctx.register_action("transpose", || -> ExtensionResult {
                panic!("transpose failed on empty selection")
            })
        }),
    )
    .expect("register a");

    let supervisor = host.start_with_sources(&[source("a", "maintainer = \"m@x.com\"")]);

    let err = supervisor
        .invoke_action("a", "transpose")
        .expect_err("action faults");
    assert!(matches!(err, SupervisorError::Faulted(_)));

    let faults = host.diagnostics().runtime_faults();
    assert_eq!(faults.len(), 1);
    let fault = &faults[0];
    assert_eq!(fault.extension(), Some("a"));
    assert_eq!(
        fault.contact().map(|contact| contact.email.as_str()),
        Some("m@x.com")
    );

    let report = fault.error_report();
    assert_eq!(
        report.recipient.map(|contact| contact.email),
        Some("m@x.com".to_string())
    );
    assert!(report.body.contains("transpose failed on empty selection"));
}

#[test]
fn call_into_extension_without_contact_still_attributes() {
    let mut host = ExtensionHost::new(HostConfig::default());
    host.register_entry("quiet", noop).expect("register quiet");
    let supervisor = host.start_with_sources(&[source("quiet", "")]);

    let err = supervisor
        .call("quiet", || -> ExtensionResult<u32> { Err("no score open".into()) })
        .expect_err("call faults");
    let SupervisorError::Faulted(fault) = err else {
        panic!("expected fault, got {err:?}");
    };
    assert_eq!(
        fault.attribution,
        Attribution::Extension {
            name: "quiet".to_string(),
            contact: None,
        }
    );
    assert_eq!(fault.error_report().recipient, None);

    let value = supervisor
        .call("quiet", || Ok(7))
        .expect("successful call passes through");
    assert_eq!(value, 7);
}

#[test]
fn supervisor_can_be_shared_across_threads() {
    let mut host = ExtensionHost::new(HostConfig::default());
    host.register_entry(
        "worker",
        entry_fn(|ctx: &mut LoadContext<'_>| {
            ctx.register_action("crash", || -> ExtensionResult { panic!("worker crash") })
        }),
    )
    .expect("register worker");
    let supervisor = Arc::new(host.start_with_sources(&[source("worker", "")]));

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let supervisor = Arc::clone(&supervisor);
            std::thread::spawn(move || supervisor.invoke_action("worker", "crash").is_err())
        })
        .collect();
    for handle in handles {
        assert!(handle.join().expect("thread should not panic"));
    }

    let faults = host.diagnostics().runtime_faults();
    assert_eq!(faults.len(), 4);
    assert!(faults.iter().all(|fault| fault.extension() == Some("worker")));
}
