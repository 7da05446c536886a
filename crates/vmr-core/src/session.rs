//! Operator session: the glue between the channel and the UI collaborators.
//!
//! The session holds the logged-in keys, keeps two inventory views (the
//! last snapshot the device pushed, and a local view with optimistic edits
//! layered on top), and turns every outcome into a user notification.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{info, warn};

use vmr_crypto::{Identity, PublicKey};
use vmr_transport::Ack;

use crate::channel::{resolve_credentials, CommandChannel, Unsubscribe};
use crate::collaborators::{
    CredentialStore, Credentials, Notification, NotificationSink, Severity, StateStore,
};
use crate::command::Command;
use crate::errors::{SendFailure, SessionError};
use crate::inventory::InventorySnapshot;

/// How long notifications stay on screen.
pub const NOTIFICATION_TIMEOUT: Duration = Duration::from_secs(3);

pub const CONNECTION_LOST_MESSAGE: &str = "Connection to relay network lost";

#[derive(Clone)]
struct ActiveLogin {
    operator: Identity,
    device: PublicKey,
}

#[derive(Default)]
struct InventoryView {
    authoritative: InventorySnapshot,
    local: InventorySnapshot,
    connected: bool,
}

pub struct OperatorSession {
    channel: Arc<CommandChannel>,
    store: Arc<dyn CredentialStore>,
    notifier: Arc<dyn NotificationSink>,
    state: Arc<dyn StateStore>,
    login: Mutex<Option<ActiveLogin>>,
    view: Arc<Mutex<InventoryView>>,
    watch: Mutex<Option<Unsubscribe>>,
}

impl OperatorSession {
    pub fn new(
        channel: Arc<CommandChannel>,
        store: Arc<dyn CredentialStore>,
        notifier: Arc<dyn NotificationSink>,
        state: Arc<dyn StateStore>,
    ) -> Self {
        Self {
            channel,
            store,
            notifier,
            state,
            login: Mutex::new(None),
            view: Arc::new(Mutex::new(InventoryView::default())),
            watch: Mutex::new(None),
        }
    }

    /// Log in from stored credentials, if any. Returns whether a login happened.
    pub async fn restore(&self) -> Result<bool, SessionError> {
        let Some(credentials) = self.store.load().await? else {
            return Ok(false);
        };
        match resolve(&credentials) {
            Ok(login) => {
                self.activate(login);
                info!("restored session from stored credentials");
                Ok(true)
            }
            Err(failure) => {
                let message = format!("Stored credentials are invalid: {}", failure.cause());
                self.notify(&message, Severity::Error);
                Err(SessionError::InvalidCredentials(message))
            }
        }
    }

    /// Validate both keys, persist them and start the session.
    pub async fn login(&self, credentials: Credentials) -> Result<(), SessionError> {
        if credentials.private_key.trim().is_empty()
            || credentials.target_public_key.trim().is_empty()
        {
            let message = "Please enter both keys";
            self.notify(message, Severity::Error);
            return Err(SessionError::InvalidCredentials(message.to_string()));
        }

        let login = match resolve(&credentials) {
            Ok(login) => login,
            Err(failure) => {
                let message = format!("Login failed: {}", failure.cause());
                self.notify(&message, Severity::Error);
                return Err(SessionError::InvalidCredentials(message));
            }
        };

        self.store.save(&credentials).await?;
        self.activate(login);
        self.notify("Logged in successfully", Severity::Success);
        Ok(())
    }

    /// Stop watching, forget the keys and clear displayed state.
    pub async fn logout(&self) -> Result<(), SessionError> {
        self.stop_watching();
        *self.login.lock() = None;
        *self.view.lock() = InventoryView::default();
        self.state.set_inventory(&InventorySnapshot::empty());
        self.state.set_connected(false);
        self.store.clear().await?;
        info!("logged out");
        Ok(())
    }

    pub fn is_logged_in(&self) -> bool {
        self.login.lock().is_some()
    }

    pub fn operator_public_key(&self) -> Option<PublicKey> {
        self.login.lock().as_ref().map(|l| *l.operator.public_key())
    }

    pub fn device_public_key(&self) -> Option<PublicKey> {
        self.login.lock().as_ref().map(|l| l.device)
    }

    pub fn is_connected(&self) -> bool {
        self.view.lock().connected
    }

    /// Local view, including optimistic edits.
    pub fn inventory(&self) -> InventorySnapshot {
        self.view.lock().local.clone()
    }

    /// Last snapshot pushed by the device.
    pub fn authoritative_inventory(&self) -> InventorySnapshot {
        self.view.lock().authoritative.clone()
    }

    pub fn channel(&self) -> &Arc<CommandChannel> {
        &self.channel
    }

    /// Send a command and report the outcome to the user.
    ///
    /// On success the local view is updated optimistically. A failure caused
    /// by unreachable relays also marks the session disconnected.
    pub async fn send_command(&self, command: &Command) -> Result<Ack, SessionError> {
        let login = self.current_login()?;
        self.notify(&format!("Sending {} command...", command.name()), Severity::Info);

        match self
            .channel
            .send(&login.operator, &login.device, command)
            .await
        {
            Ok(ack) => {
                self.notify(
                    &format!("Command {} sent successfully", command.name()),
                    Severity::Success,
                );
                let local = {
                    let mut view = self.view.lock();
                    view.local.apply_optimistic(command);
                    view.local.clone()
                };
                self.state.set_inventory(&local);
                Ok(ack)
            }
            Err(failure) => {
                self.report_failure(&failure);
                Err(failure.into())
            }
        }
    }

    /// Subscribe to the device's pushes. Each snapshot replaces both views.
    pub fn watch(&self) -> Result<(), SessionError> {
        let login = self.current_login()?;
        let mut watch = self.watch.lock();
        if watch.as_ref().is_some_and(Unsubscribe::is_active) {
            return Ok(());
        }

        let view = Arc::clone(&self.view);
        let state = Arc::clone(&self.state);
        let unsubscribe =
            self.channel
                .subscribe_to_device_updates(&login.operator, &login.device, move |snapshot| {
                    let reconnected = {
                        let mut view = view.lock();
                        view.authoritative = snapshot.clone();
                        view.local = snapshot.clone();
                        !std::mem::replace(&mut view.connected, true)
                    };
                    state.set_inventory(&snapshot);
                    if reconnected {
                        state.set_connected(true);
                    }
                });
        *watch = Some(unsubscribe);
        Ok(())
    }

    pub fn stop_watching(&self) {
        if let Some(unsubscribe) = self.watch.lock().take() {
            unsubscribe.unsubscribe();
        }
    }

    pub fn is_watching(&self) -> bool {
        self.watch
            .lock()
            .as_ref()
            .is_some_and(Unsubscribe::is_active)
    }

    fn current_login(&self) -> Result<ActiveLogin, SessionError> {
        self.login.lock().clone().ok_or(SessionError::NotLoggedIn)
    }

    fn activate(&self, login: ActiveLogin) {
        *self.login.lock() = Some(login);
        self.view.lock().connected = true;
        self.state.set_connected(true);
    }

    fn report_failure(&self, failure: &SendFailure) {
        self.notify(failure.cause(), Severity::Error);
        if failure.relay_unavailable() {
            warn!("relays unreachable, marking session disconnected");
            self.view.lock().connected = false;
            self.state.set_connected(false);
            self.notify(CONNECTION_LOST_MESSAGE, Severity::Error);
        }
    }

    fn notify(&self, message: &str, severity: Severity) {
        self.notifier.notify(Notification {
            message: message.to_string(),
            severity,
            auto_dismiss_after: Some(NOTIFICATION_TIMEOUT),
        });
    }
}

impl Drop for OperatorSession {
    fn drop(&mut self) {
        self.stop_watching();
    }
}

fn resolve(credentials: &Credentials) -> Result<ActiveLogin, SendFailure> {
    let (operator, device) = resolve_credentials(credentials)?;
    Ok(ActiveLogin { operator, device })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::InMemoryCredentialStore;
    use crate::harness::{RecordingNotifier, RecordingStateStore, SimulatedDevice};
    use vmr_crypto::FixedClock;
    use vmr_transport::testing::{MockBehavior, MockRelay};
    use vmr_transport::{RelayConnection, RelaySet};

    struct Fixture {
        relay: Arc<MockRelay>,
        store: Arc<InMemoryCredentialStore>,
        notifier: Arc<RecordingNotifier>,
        state: Arc<RecordingStateStore>,
        session: OperatorSession,
    }

    fn fixture(relay: MockRelay) -> Fixture {
        let relay = Arc::new(relay);
        let relays = RelaySet::from_connections(vec![Arc::clone(&relay) as Arc<dyn RelayConnection>]);
        let channel = Arc::new(CommandChannel::new(
            Arc::new(relays),
            Arc::new(FixedClock::new(1_700_000_000)),
            Duration::from_secs(5),
        ));
        let store = Arc::new(InMemoryCredentialStore::new());
        let notifier = Arc::new(RecordingNotifier::default());
        let state = Arc::new(RecordingStateStore::default());
        let session = OperatorSession::new(
            channel,
            Arc::clone(&store) as Arc<dyn CredentialStore>,
            Arc::clone(&notifier) as Arc<dyn NotificationSink>,
            Arc::clone(&state) as Arc<dyn StateStore>,
        );
        Fixture {
            relay,
            store,
            notifier,
            state,
            session,
        }
    }

    fn credentials(operator: &Identity, device: &Identity) -> Credentials {
        Credentials {
            private_key: operator.secret_key().to_bech32().unwrap(),
            target_public_key: device.public_key().to_bech32().unwrap(),
        }
    }

    #[tokio::test]
    async fn test_login_persists_and_notifies() {
        let f = fixture(MockRelay::new("ws://a"));
        let operator = Identity::generate().unwrap();
        let device = Identity::generate().unwrap();

        f.session.login(credentials(&operator, &device)).await.unwrap();
        assert!(f.session.is_logged_in());
        assert_eq!(f.session.device_public_key(), Some(*device.public_key()));
        assert_eq!(f.store.load().await.unwrap(), Some(credentials(&operator, &device)));
        assert_eq!(f.notifier.messages(), vec!["Logged in successfully".to_string()]);
        assert_eq!(f.state.connected(), vec![true]);
    }

    #[tokio::test]
    async fn test_login_rejects_missing_or_bad_keys() {
        let f = fixture(MockRelay::new("ws://a"));
        let err = f
            .session
            .login(Credentials {
                private_key: " ".to_string(),
                target_public_key: "npub1x".to_string(),
            })
            .await
            .unwrap_err();
        assert_eq!(err, SessionError::InvalidCredentials("Please enter both keys".into()));

        let device = Identity::generate().unwrap();
        let err = f
            .session
            .login(Credentials {
                private_key: "nsec1broken".to_string(),
                target_public_key: device.public_key().to_hex(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::InvalidCredentials(ref m) if m.starts_with("Login failed: Invalid private key format")));
        assert!(!f.session.is_logged_in());
        assert_eq!(f.store.load().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_restore_uses_stored_credentials() {
        let f = fixture(MockRelay::new("ws://a"));
        assert!(!f.session.restore().await.unwrap());

        let operator = Identity::generate().unwrap();
        let device = Identity::generate().unwrap();
        f.store.save(&credentials(&operator, &device)).await.unwrap();
        assert!(f.session.restore().await.unwrap());
        assert_eq!(f.session.operator_public_key(), Some(*operator.public_key()));
    }

    #[tokio::test]
    async fn test_send_requires_login() {
        let f = fixture(MockRelay::new("ws://a"));
        assert_eq!(
            f.session.send_command(&Command::Status).await.unwrap_err(),
            SessionError::NotLoggedIn
        );
    }

    #[tokio::test]
    async fn test_successful_send_applies_optimistic_update() {
        let f = fixture(MockRelay::new("ws://a"));
        let operator = Identity::generate().unwrap();
        let device = Identity::generate().unwrap();
        f.session.login(credentials(&operator, &device)).await.unwrap();

        let command = Command::AddItem {
            id: 5,
            name: "Soda".to_string(),
            price: 250,
            count: 10,
        };
        f.session.send_command(&command).await.unwrap();

        assert_eq!(f.session.inventory().get(5).unwrap().count, 10);
        // nothing from the device yet
        assert!(f.session.authoritative_inventory().is_empty());
        assert_ne!(f.session.inventory(), f.session.authoritative_inventory());
        assert_eq!(
            f.notifier.messages()[1..],
            [
                "Sending AddItem command...".to_string(),
                "Command AddItem sent successfully".to_string()
            ]
        );
        assert_eq!(f.relay.published().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unreachable_relays_mark_disconnected() {
        let f = fixture(MockRelay::new("ws://a").with_behavior(MockBehavior::Hang));
        let operator = Identity::generate().unwrap();
        let device = Identity::generate().unwrap();
        f.session.login(credentials(&operator, &device)).await.unwrap();

        let err = f.session.send_command(&Command::Reboot).await.unwrap_err();
        assert!(matches!(err, SessionError::Send(ref s) if s.relay_unavailable()));
        assert!(!f.session.is_connected());
        assert_eq!(f.state.connected(), vec![true, false]);
        assert_eq!(
            f.notifier.messages().last().map(String::as_str),
            Some(CONNECTION_LOST_MESSAGE)
        );
        assert!(f.session.inventory().is_empty());
    }

    #[tokio::test]
    async fn test_rejection_keeps_connection_state() {
        let f = fixture(MockRelay::new("ws://a").with_behavior(MockBehavior::Reject("spam".into())));
        let operator = Identity::generate().unwrap();
        let device = Identity::generate().unwrap();
        f.session.login(credentials(&operator, &device)).await.unwrap();

        assert!(f.session.send_command(&Command::Status).await.is_err());
        assert!(f.session.is_connected());
        assert_eq!(
            f.notifier.last().unwrap().severity,
            Severity::Error
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_watch_replaces_both_views() {
        let f = fixture(MockRelay::new("ws://a"));
        let operator = Identity::generate().unwrap();
        let device = SimulatedDevice::generate();
        f.session
            .login(credentials(&operator, device.identity()))
            .await
            .unwrap();

        f.session
            .send_command(&Command::AddItem {
                id: 9,
                name: "Gum".to_string(),
                price: 50,
                count: 1,
            })
            .await
            .unwrap();

        f.session.watch().unwrap();
        f.session.watch().unwrap();
        assert!(f.session.is_watching());
        f.relay.wait_for_subscription().await;
        assert_eq!(f.relay.active_subscriptions(), 1);

        device.set_inventory(
            InventorySnapshot::parse(
                br#"{"items":[{"id":1,"name":"Candy Bar","price":150,"count":12}]}"#,
            )
            .unwrap(),
        );
        f.relay
            .inject(&device.snapshot_envelope(operator.public_key()).unwrap());
        f.state.wait_for_inventories(2).await;

        assert_eq!(f.session.inventory(), f.session.authoritative_inventory());
        assert!(f.session.inventory().get(9).is_none());
        assert_eq!(f.session.inventory().get(1).unwrap().count, 12);

        f.session.logout().await.unwrap();
        assert!(!f.session.is_watching());
        assert!(f.session.inventory().is_empty());
        assert_eq!(f.store.load().await.unwrap(), None);
    }
}
