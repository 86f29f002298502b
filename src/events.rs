use crate::models::Category;
use crate::timefmt::Timestamp;

/// What a view layer needs to re-render after any change.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatePayload {
    pub categories: Vec<Category>,
    pub loading: bool,
    #[serde(with = "crate::timefmt::iso_option")]
    pub last_saved: Option<Timestamp>,
}
