use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::broadcast;

use bmhost_core::*;

// Mock reconciler: every action completes unless told otherwise
struct MockReconciler {
    os_secret: Option<SshSecret>,
    rescue_secret: Option<SshSecret>,
    fetch_error: Option<String>,
    validation: ActionOutcome,
    rescue_validation: Option<ActionOutcome>,
    action_outcome: ActionOutcome,
    calls: Mutex<Vec<String>>,
}

impl MockReconciler {
    fn new() -> Self {
        Self {
            os_secret: None,
            rescue_secret: None,
            fetch_error: None,
            validation: ActionOutcome::Complete,
            rescue_validation: None,
            action_outcome: ActionOutcome::Complete,
            calls: Mutex::new(Vec::new()),
        }
    }

    fn with_os_secret(mut self, secret: SshSecret) -> Self {
        self.os_secret = Some(secret);
        self
    }

    fn with_rescue_secret(mut self, secret: SshSecret) -> Self {
        self.rescue_secret = Some(secret);
        self
    }

    fn with_action_outcome(mut self, outcome: ActionOutcome) -> Self {
        self.action_outcome = outcome;
        self
    }

    fn with_validation(mut self, outcome: ActionOutcome) -> Self {
        self.validation = outcome;
        self
    }

    fn with_rescue_validation(mut self, outcome: ActionOutcome) -> Self {
        self.rescue_validation = Some(outcome);
        self
    }

    fn with_fetch_error(mut self, error: &str) -> Self {
        self.fetch_error = Some(error.to_string());
        self
    }

    fn record(&self, call: impl Into<String>) {
        self.calls.lock().unwrap().push(call.into());
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn actions(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| c.starts_with("action_"))
            .collect()
    }

    fn action(&self, name: &str) -> ActionOutcome {
        self.record(name);
        self.action_outcome.clone()
    }
}

#[async_trait]
impl HostReconciler for MockReconciler {
    async fn get_ssh_keys(
        &self,
        _host: &HostRecord,
    ) -> Result<(Option<SshSecret>, Option<SshSecret>), CoreError> {
        self.record("get_ssh_keys");
        if let Some(error) = &self.fetch_error {
            return Err(CoreError::Action(error.clone()));
        }
        Ok((self.os_secret.clone(), self.rescue_secret.clone()))
    }

    async fn validate_ssh_key(
        &self,
        _host: &HostRecord,
        _secret: &SshSecret,
        kind: CredentialKind,
    ) -> ActionOutcome {
        self.record(format!("validate_{kind}"));
        match (kind, &self.rescue_validation) {
            (CredentialKind::Rescue, Some(outcome)) => outcome.clone(),
            _ => self.validation.clone(),
        }
    }

    async fn record_action_failure(
        &self,
        _host: &HostRecord,
        error_type: ErrorType,
        message: &str,
    ) -> ActionOutcome {
        self.record("record_action_failure");
        ActionOutcome::Failed(CoreError::Recorded {
            error_type,
            message: message.to_string(),
        })
    }

    async fn action_preparing(&self, _host: &HostRecord) -> ActionOutcome {
        self.action("action_preparing")
    }

    async fn action_registering(&self, _host: &HostRecord) -> ActionOutcome {
        self.action("action_registering")
    }

    async fn action_image_installing(&self, _host: &HostRecord) -> ActionOutcome {
        self.action("action_image_installing")
    }

    async fn action_provisioning(&self, _host: &HostRecord) -> ActionOutcome {
        self.action("action_provisioning")
    }

    async fn action_ensure_provisioned(&self, _host: &HostRecord) -> ActionOutcome {
        self.action("action_ensure_provisioned")
    }

    async fn action_provisioned(&self, _host: &HostRecord) -> ActionOutcome {
        self.action("action_provisioned")
    }

    async fn action_deprovisioning(&self, _host: &HostRecord) -> ActionOutcome {
        self.action("action_deprovisioning")
    }

    async fn action_deleting(&self, _host: &HostRecord) -> ActionOutcome {
        self.action("action_deleting")
    }
}

fn host(state: ProvisioningState) -> HostRecord {
    HostRecord::new("bm-1")
        .with_state(state)
        .with_install_image(InstallImage::new("ubuntu-24.04"))
}

fn os_secret(public_key: &str) -> SshSecret {
    SshSecret::new("os-key", "default").with_data("public-key", public_key)
}

fn rescue_secret(public_key: &str) -> SshSecret {
    SshSecret::new("rescue-key", "default").with_data("public-key", public_key)
}

async fn tick(host: &mut HostRecord, reconciler: &MockReconciler) -> (ActionOutcome, Vec<HostEvent>) {
    let (tx, mut rx) = broadcast::channel(16);
    let outcome = HostStateMachine::new(host, reconciler, &tx)
        .reconcile_state()
        .await;

    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    (outcome, events)
}

#[tokio::test]
async fn test_preparing_complete_advances_to_registering() {
    let reconciler = MockReconciler::new();
    let mut host = host(ProvisioningState::Preparing);

    let (outcome, events) = tick(&mut host, &reconciler).await;

    assert_eq!(outcome, ActionOutcome::Complete);
    assert_eq!(host.provisioning_state, ProvisioningState::Registering);
    assert_eq!(reconciler.actions(), vec!["action_preparing"]);
    assert_eq!(
        events,
        vec![HostEvent::ProvisioningStateChanged {
            host: "bm-1".to_string(),
            from: ProvisioningState::Preparing,
            to: ProvisioningState::Registering,
        }]
    );
}

#[tokio::test]
async fn test_full_lifecycle_reaches_provisioned() {
    let reconciler = MockReconciler::new();
    let mut host = host(ProvisioningState::Preparing);

    for expected in [
        ProvisioningState::Registering,
        ProvisioningState::ImageInstalling,
        ProvisioningState::Provisioning,
        ProvisioningState::EnsureProvisioned,
        ProvisioningState::Provisioned,
        ProvisioningState::Provisioned,
    ] {
        let (outcome, _) = tick(&mut host, &reconciler).await;
        assert!(outcome.is_complete());
        assert_eq!(host.provisioning_state, expected);
    }

    assert_eq!(
        reconciler.actions(),
        vec![
            "action_preparing",
            "action_registering",
            "action_image_installing",
            "action_provisioning",
            "action_ensure_provisioned",
            "action_provisioned",
        ]
    );
}

#[tokio::test]
async fn test_continue_keeps_state_and_emits_nothing() {
    let delay = Duration::from_secs(10);
    let reconciler =
        MockReconciler::new().with_action_outcome(ActionOutcome::continue_after(delay));
    let mut host = host(ProvisioningState::ImageInstalling);
    let before = host.clone();

    let (outcome, events) = tick(&mut host, &reconciler).await;

    assert_eq!(outcome, ActionOutcome::Continue { delay });
    assert_eq!(host, before);
    assert!(events.is_empty());
}

#[tokio::test]
async fn test_failed_action_is_propagated() {
    let reconciler = MockReconciler::new()
        .with_action_outcome(ActionOutcome::failed(CoreError::Action("boom".to_string())));
    let mut host = host(ProvisioningState::Registering);

    let (outcome, events) = tick(&mut host, &reconciler).await;

    assert_eq!(
        outcome.error(),
        Some(&CoreError::Action("boom".to_string()))
    );
    assert_eq!(host.provisioning_state, ProvisioningState::Registering);
    assert!(events.is_empty());
}

#[tokio::test]
async fn test_deletion_of_provisioned_host_deprovisions_first() {
    let reconciler = MockReconciler::new();
    let mut host = host(ProvisioningState::Provisioned);
    host.request_deletion(Utc::now());

    let (outcome, events) = tick(&mut host, &reconciler).await;

    assert_eq!(outcome, ActionOutcome::Complete);
    assert_eq!(host.provisioning_state, ProvisioningState::Deprovisioning);
    assert!(reconciler.calls().is_empty());
    assert_eq!(
        events,
        vec![
            HostEvent::DeletionInitiated {
                host: "bm-1".to_string(),
                from: ProvisioningState::Provisioned,
                to: ProvisioningState::Deprovisioning,
            },
            HostEvent::ProvisioningStateChanged {
                host: "bm-1".to_string(),
                from: ProvisioningState::Provisioned,
                to: ProvisioningState::Deprovisioning,
            },
        ]
    );
}

#[tokio::test]
async fn test_deletion_diverts_every_state_but_deprovisioning() {
    for state in ProvisioningState::ALL {
        if state == ProvisioningState::Deprovisioning {
            continue;
        }
        let reconciler = MockReconciler::new();
        let mut host = host(state);
        host.request_deletion(Utc::now());

        let (outcome, _) = tick(&mut host, &reconciler).await;

        let expected = if state.requires_deprovisioning() {
            ProvisioningState::Deprovisioning
        } else {
            ProvisioningState::Deleting
        };
        assert!(outcome.is_complete(), "{state}");
        assert_eq!(host.provisioning_state, expected, "{state}");
        assert!(reconciler.calls().is_empty(), "{state}");
    }
}

#[tokio::test]
async fn test_deletion_lets_deprovisioning_continue() {
    let reconciler = MockReconciler::new()
        .with_action_outcome(ActionOutcome::continue_after(Duration::from_secs(5)));
    let mut host = host(ProvisioningState::Deprovisioning);
    host.request_deletion(Utc::now());

    let (outcome, events) = tick(&mut host, &reconciler).await;

    assert!(!outcome.is_complete());
    assert_eq!(host.provisioning_state, ProvisioningState::Deprovisioning);
    assert_eq!(reconciler.calls(), vec!["action_deprovisioning"]);
    assert!(events.is_empty());
}

#[tokio::test]
async fn test_marked_deleting_host_ends_tick_untouched() {
    let reconciler = MockReconciler::new()
        .with_action_outcome(ActionOutcome::continue_after(Duration::from_secs(3)));
    let mut host = host(ProvisioningState::Deleting);
    host.request_deletion(Utc::now());
    let before = host.clone();

    let (outcome, events) = tick(&mut host, &reconciler).await;

    assert_eq!(outcome, ActionOutcome::Complete);
    assert_eq!(host, before);
    assert!(reconciler.calls().is_empty());
    assert!(events.is_empty());
}

#[tokio::test]
async fn test_unmarked_deleting_host_runs_deleting_action() {
    let delay = Duration::from_secs(3);
    let reconciler =
        MockReconciler::new().with_action_outcome(ActionOutcome::continue_after(delay));
    let mut host = host(ProvisioningState::Deleting);

    let (outcome, _) = tick(&mut host, &reconciler).await;

    assert_eq!(outcome, ActionOutcome::Continue { delay });
    assert_eq!(host.provisioning_state, ProvisioningState::Deleting);
    assert_eq!(reconciler.actions(), vec!["action_deleting"]);
}

#[tokio::test]
async fn test_cancelled_provisioning_pivots_to_deprovisioning() {
    for state in [
        ProvisioningState::Preparing,
        ProvisioningState::Registering,
        ProvisioningState::ImageInstalling,
        ProvisioningState::Provisioning,
        ProvisioningState::EnsureProvisioned,
        ProvisioningState::Provisioned,
    ] {
        let reconciler = MockReconciler::new();
        let mut host = HostRecord::new("bm-1").with_state(state);

        let (outcome, _) = tick(&mut host, &reconciler).await;

        assert!(outcome.is_complete(), "{state}");
        assert_eq!(
            host.provisioning_state,
            ProvisioningState::Deprovisioning,
            "{state}"
        );
        assert!(reconciler.actions().is_empty(), "{state}");
    }
}

#[tokio::test]
async fn test_deprovisioning_recycles_host_without_install_image() {
    let reconciler = MockReconciler::new().with_os_secret(os_secret("AAAA"));
    let mut host = HostRecord::new("bm-1").with_state(ProvisioningState::Deprovisioning);

    let (outcome, _) = tick(&mut host, &reconciler).await;

    assert_eq!(outcome, ActionOutcome::Complete);
    assert_eq!(host.provisioning_state, ProvisioningState::None);
    // secrets are not looked at once teardown has begun
    assert_eq!(reconciler.calls(), vec!["action_deprovisioning"]);
}

#[tokio::test]
async fn test_os_secret_rotation_while_provisioning_reinstalls_image() {
    let reconciler = MockReconciler::new().with_os_secret(os_secret("BBBB"));
    let mut host = host(ProvisioningState::Provisioning);
    host.update_os_ssh_status(&os_secret("AAAA")).unwrap();

    let (outcome, _) = tick(&mut host, &reconciler).await;

    assert!(outcome.is_complete());
    assert_eq!(host.provisioning_state, ProvisioningState::ImageInstalling);
    assert!(reconciler.actions().is_empty());
    assert!(
        host.ssh_status
            .current_os
            .as_ref()
            .is_some_and(|s| s.matches(&os_secret("BBBB")))
    );
}

#[tokio::test]
async fn test_os_secret_rotation_while_ensuring_ignores_action_outcome() {
    let reconciler = MockReconciler::new()
        .with_os_secret(os_secret("BBBB"))
        .with_action_outcome(ActionOutcome::failed(CoreError::Action("down".to_string())));
    let mut host = host(ProvisioningState::EnsureProvisioned);
    host.update_os_ssh_status(&os_secret("AAAA")).unwrap();

    tick(&mut host, &reconciler).await;

    assert_eq!(host.provisioning_state, ProvisioningState::ImageInstalling);
}

#[tokio::test]
async fn test_os_secret_rotation_on_provisioned_host_fails() {
    let reconciler = MockReconciler::new().with_os_secret(os_secret("BBBB"));
    let mut host = host(ProvisioningState::Provisioned);
    host.update_os_ssh_status(&os_secret("AAAA")).unwrap();
    let stored = host.ssh_status.current_os.clone();

    let (outcome, events) = tick(&mut host, &reconciler).await;

    assert!(matches!(
        outcome,
        ActionOutcome::Failed(CoreError::Recorded {
            error_type: ErrorType::RegistrationError,
            ..
        })
    ));
    assert_eq!(host.provisioning_state, ProvisioningState::Provisioned);
    assert_eq!(host.ssh_status.current_os, stored);
    assert_eq!(
        reconciler.calls(),
        vec!["get_ssh_keys", "record_action_failure"]
    );
    assert!(matches!(
        events.as_slice(),
        [HostEvent::SshSecretUnexpectedlyModified { .. }]
    ));
}

#[tokio::test]
async fn test_first_os_secret_is_recorded_without_state_change() {
    let reconciler = MockReconciler::new().with_os_secret(os_secret("AAAA"));
    let mut host = host(ProvisioningState::Provisioned);

    let (outcome, _) = tick(&mut host, &reconciler).await;

    assert!(outcome.is_complete());
    assert_eq!(host.provisioning_state, ProvisioningState::Provisioned);
    assert!(host.ssh_status.current_os.is_some());
    assert_eq!(
        reconciler.calls(),
        vec!["get_ssh_keys", "validate_os", "action_provisioned"]
    );
}

#[tokio::test]
async fn test_os_secret_rotation_elsewhere_only_updates_fingerprint() {
    let reconciler = MockReconciler::new().with_os_secret(os_secret("BBBB"));
    let mut host = host(ProvisioningState::Registering);
    host.update_os_ssh_status(&os_secret("AAAA")).unwrap();

    let (outcome, _) = tick(&mut host, &reconciler).await;

    assert!(outcome.is_complete());
    assert_eq!(host.provisioning_state, ProvisioningState::ImageInstalling);
    assert!(
        host.ssh_status
            .current_os
            .as_ref()
            .is_some_and(|s| s.matches(&os_secret("BBBB")))
    );
}

#[tokio::test]
async fn test_rescue_secret_rotation_before_install_resets_to_none() {
    for state in [
        ProvisioningState::Preparing,
        ProvisioningState::Registering,
        ProvisioningState::ImageInstalling,
    ] {
        let reconciler = MockReconciler::new().with_rescue_secret(rescue_secret("BBBB"));
        let mut host = host(state);
        host.update_rescue_ssh_status(&rescue_secret("AAAA")).unwrap();

        let (outcome, events) = tick(&mut host, &reconciler).await;

        assert!(outcome.is_complete(), "{state}");
        assert_eq!(host.provisioning_state, ProvisioningState::None, "{state}");
        assert!(reconciler.actions().is_empty(), "{state}");
        assert_eq!(
            events,
            vec![HostEvent::ProvisioningStateChanged {
                host: "bm-1".to_string(),
                from: state,
                to: ProvisioningState::None,
            }],
            "{state}"
        );
    }
}

#[tokio::test]
async fn test_rescue_secret_rotation_while_ensuring_only_updates_fingerprint() {
    let reconciler = MockReconciler::new().with_rescue_secret(rescue_secret("BBBB"));
    let mut host = host(ProvisioningState::EnsureProvisioned);
    host.update_rescue_ssh_status(&rescue_secret("AAAA")).unwrap();

    let (outcome, _) = tick(&mut host, &reconciler).await;

    assert!(outcome.is_complete());
    assert_eq!(host.provisioning_state, ProvisioningState::Provisioned);
    assert_eq!(reconciler.actions(), vec!["action_ensure_provisioned"]);
    assert!(
        host.ssh_status
            .current_rescue
            .as_ref()
            .is_some_and(|s| s.matches(&rescue_secret("BBBB")))
    );
}

#[tokio::test]
async fn test_unfingerprintable_os_secret_fails_after_redirect() {
    let nameless = SshSecret::new("", "default").with_data("public-key", "BBBB");
    let reconciler = MockReconciler::new().with_os_secret(nameless);
    let mut host = host(ProvisioningState::Provisioning);
    host.update_os_ssh_status(&os_secret("AAAA")).unwrap();
    let stored = host.ssh_status.current_os.clone();

    let (outcome, events) = tick(&mut host, &reconciler).await;

    assert!(matches!(
        outcome,
        ActionOutcome::Failed(CoreError::SecretStatusUpdate {
            kind: CredentialKind::Os,
            ..
        })
    ));
    // the redirect computed before the failure is still committed
    assert_eq!(host.provisioning_state, ProvisioningState::ImageInstalling);
    assert_eq!(host.ssh_status.current_os, stored);
    assert_eq!(reconciler.calls(), vec!["get_ssh_keys"]);
    assert_eq!(
        events,
        vec![HostEvent::ProvisioningStateChanged {
            host: "bm-1".to_string(),
            from: ProvisioningState::Provisioning,
            to: ProvisioningState::ImageInstalling,
        }]
    );
}

#[tokio::test]
async fn test_unfingerprintable_rescue_secret_fails() {
    let nameless = SshSecret::new(" ", "default").with_data("public-key", "BBBB");
    let reconciler = MockReconciler::new().with_rescue_secret(nameless);
    let mut host = host(ProvisioningState::Provisioned);
    host.update_rescue_ssh_status(&rescue_secret("AAAA")).unwrap();

    let (outcome, events) = tick(&mut host, &reconciler).await;

    assert!(matches!(
        outcome,
        ActionOutcome::Failed(CoreError::SecretStatusUpdate {
            kind: CredentialKind::Rescue,
            ..
        })
    ));
    assert_eq!(host.provisioning_state, ProvisioningState::Provisioned);
    assert!(reconciler.actions().is_empty());
    assert!(events.is_empty());
}

#[tokio::test]
async fn test_pending_rescue_validation_suspends_handler() {
    let delay = Duration::from_secs(15);
    let reconciler = MockReconciler::new()
        .with_os_secret(os_secret("AAAA"))
        .with_rescue_secret(rescue_secret("AAAA"))
        .with_rescue_validation(ActionOutcome::continue_after(delay));
    let mut host = host(ProvisioningState::Registering);

    let (outcome, _) = tick(&mut host, &reconciler).await;

    assert_eq!(outcome, ActionOutcome::Continue { delay });
    assert_eq!(host.provisioning_state, ProvisioningState::Registering);
    assert_eq!(
        reconciler.calls(),
        vec!["get_ssh_keys", "validate_os", "validate_rescue"]
    );
}

#[tokio::test]
async fn test_failed_tick_after_os_redirect_still_writes_state() {
    let reconciler = MockReconciler::new()
        .with_os_secret(os_secret("BBBB"))
        .with_rescue_secret(rescue_secret("AAAA"))
        .with_rescue_validation(ActionOutcome::failed(CoreError::Action(
            "rescue key rejected".to_string(),
        )));
    let mut host = host(ProvisioningState::EnsureProvisioned);
    host.update_os_ssh_status(&os_secret("AAAA")).unwrap();

    let (outcome, events) = tick(&mut host, &reconciler).await;

    assert_eq!(
        outcome.error(),
        Some(&CoreError::Action("rescue key rejected".to_string()))
    );
    assert_eq!(host.provisioning_state, ProvisioningState::ImageInstalling);
    assert!(reconciler.actions().is_empty());
    assert_eq!(events.len(), 1);
}

#[tokio::test]
async fn test_failed_tick_without_redirect_leaves_record_untouched() {
    let reconciler = MockReconciler::new()
        .with_os_secret(os_secret("AAAA"))
        .with_validation(ActionOutcome::failed(CoreError::Action(
            "os key rejected".to_string(),
        )));
    let mut host = host(ProvisioningState::Provisioning);
    host.update_os_ssh_status(&os_secret("AAAA")).unwrap();
    let before = host.clone();

    let (outcome, events) = tick(&mut host, &reconciler).await;

    assert!(!outcome.is_complete());
    assert_eq!(host, before);
    assert!(events.is_empty());
}

#[tokio::test]
async fn test_rescue_secret_rotation_after_install_keeps_state() {
    let reconciler = MockReconciler::new().with_rescue_secret(rescue_secret("BBBB"));
    let mut host = host(ProvisioningState::Provisioned);
    host.update_rescue_ssh_status(&rescue_secret("AAAA")).unwrap();

    let (outcome, _) = tick(&mut host, &reconciler).await;

    assert!(outcome.is_complete());
    assert_eq!(host.provisioning_state, ProvisioningState::Provisioned);
    assert!(
        host.ssh_status
            .current_rescue
            .as_ref()
            .is_some_and(|s| s.matches(&rescue_secret("BBBB")))
    );
    assert_eq!(reconciler.actions(), vec!["action_provisioned"]);
}

#[tokio::test]
async fn test_pending_validation_suspends_handler() {
    let delay = Duration::from_secs(30);
    let reconciler = MockReconciler::new()
        .with_os_secret(os_secret("AAAA"))
        .with_rescue_secret(rescue_secret("AAAA"))
        .with_validation(ActionOutcome::continue_after(delay));
    let mut host = host(ProvisioningState::Preparing);

    let (outcome, events) = tick(&mut host, &reconciler).await;

    assert_eq!(outcome, ActionOutcome::Continue { delay });
    assert_eq!(host.provisioning_state, ProvisioningState::Preparing);
    // rescue secret is not looked at once the os secret is pending
    assert_eq!(reconciler.calls(), vec!["get_ssh_keys", "validate_os"]);
    assert!(events.is_empty());
}

#[tokio::test]
async fn test_secret_fetch_error_aborts_tick() {
    let reconciler = MockReconciler::new().with_fetch_error("secret not found");
    let mut host = host(ProvisioningState::Provisioning);

    let (outcome, _) = tick(&mut host, &reconciler).await;

    assert!(matches!(
        outcome,
        ActionOutcome::Failed(CoreError::SecretFetch(_))
    ));
    assert_eq!(host.provisioning_state, ProvisioningState::Provisioning);
    assert!(reconciler.actions().is_empty());
}

#[tokio::test]
async fn test_state_none_has_no_handler() {
    let reconciler = MockReconciler::new();
    let mut host = host(ProvisioningState::None);

    let (outcome, events) = tick(&mut host, &reconciler).await;

    let error = outcome.error().unwrap();
    assert_eq!(
        error,
        &CoreError::NoHandler {
            state: ProvisioningState::None
        }
    );
    assert!(error.is_fatal());
    assert_eq!(host.provisioning_state, ProvisioningState::None);
    assert!(events.is_empty());
}

#[tokio::test]
async fn test_next_state_defaults_to_current_state() {
    let reconciler = MockReconciler::new();
    let mut host = host(ProvisioningState::Provisioning);
    let (tx, _rx) = broadcast::channel(4);

    let machine = HostStateMachine::new(&mut host, &reconciler, &tx);

    assert_eq!(machine.next_state(), ProvisioningState::Provisioning);
}
