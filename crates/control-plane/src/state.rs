use crate::auth::AuthService;
use crate::sites::SiteService;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub sites: Arc<SiteService>,
    pub auth: Arc<AuthService>,
    pub static_dir: PathBuf,
}
