use thiserror::Error;

#[derive(Error, Debug)]
pub enum HaloError {
    #[error("No {kind} registered under the name '{name}'")]
    NotFound { kind: &'static str, name: String },

    #[error("Cannot convert from '{from}' to '{to}': incompatible dimensions")]
    UnitConversion { from: String, to: String },

    #[error("Unknown unit: '{0}'")]
    UnknownUnit(String),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML deserialization failed: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Halo finder failed: {0}")]
    Finder(String),

    #[error("Callback '{callback}' failed on halo {halo}: {source}")]
    Callback {
        callback: String,
        halo: i64,
        #[source]
        source: Box<HaloError>,
    },

    #[error("Invalid Rockstar output '{path}': {reason}")]
    InvalidRockstarOutput { path: String, reason: String },

    #[error("Cannot build field info: {0}")]
    NoFieldInfo(String),
}

impl HaloError {
    pub fn not_found(kind: &'static str, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            name: name.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, HaloError>;
