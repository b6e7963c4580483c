use std::path::PathBuf;
use std::sync::Arc;

use speakup_db::Database;
use speakup_types::Redacted;

use crate::activation::Activation;
use crate::agencies::AgencyCatalog;
use crate::attachments::{AttachmentManager, BlobStore};
use crate::credentials::CredentialStore;
use crate::feedback::FeedbackManager;
use crate::notify::Notifier;
use crate::session::SessionIssuer;

pub type AppState = Arc<AppContext>;

/// Knobs the router reads when it is assembled.
#[derive(Debug, Clone, Default)]
pub struct Settings {
    /// Serve stored attachments from this directory under `/uploads`.
    pub upload_dir: Option<PathBuf>,
    /// Attach diagnostic detail to 5xx bodies. Development only.
    pub expose_error_details: bool,
}

/// Everything a handler needs, built once at startup and shared by reference.
pub struct AppContext {
    pub credentials: CredentialStore,
    pub activation: Activation,
    pub sessions: SessionIssuer,
    pub feedback: FeedbackManager,
    pub agencies: AgencyCatalog,
    pub settings: Settings,
}

impl AppContext {
    pub fn new(
        db: Arc<Database>,
        jwt_secret: &Redacted<String>,
        store: Arc<dyn BlobStore>,
        notifier: Arc<dyn Notifier>,
        frontend_url: &str,
        settings: Settings,
    ) -> AppState {
        let credentials = CredentialStore::new(db.clone());

        Arc::new(Self {
            activation: Activation::new(credentials.clone(), notifier, frontend_url),
            sessions: SessionIssuer::new(jwt_secret, credentials.clone()),
            feedback: FeedbackManager::new(db.clone(), AttachmentManager::new(store)),
            agencies: AgencyCatalog::new(db),
            credentials,
            settings,
        })
    }
}
