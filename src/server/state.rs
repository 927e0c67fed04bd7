use crate::settings;

#[derive(Clone)]
pub(crate) struct ServerState {
    pub(crate) settings: settings::Settings,
    /// `provider:model` used when a request names none.
    pub(crate) model: Option<String>,
    pub(crate) key: Option<String>,
}
