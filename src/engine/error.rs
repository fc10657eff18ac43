use crate::model::ConflictInfo;

#[derive(Debug)]
pub enum EngineError {
    /// Missing or malformed input; nothing was written.
    Validation {
        field: &'static str,
        message: String,
    },
    /// The proposed interval overlaps these bookings on the same machine.
    Conflict(Vec<ConflictInfo>),
    NotFound {
        entity: &'static str,
        id: String,
    },
    AlreadyExists {
        entity: &'static str,
        id: String,
    },
    /// Delete refused while bookings still reference the entity.
    ReferencedBy {
        entity: &'static str,
        id: String,
        bookings: Vec<String>,
    },
    LimitExceeded(&'static str),
    Storage(String),
}

impl EngineError {
    pub(crate) fn validation(field: &'static str, message: impl Into<String>) -> Self {
        EngineError::Validation {
            field,
            message: message.into(),
        }
    }

    pub(crate) fn not_found(entity: &'static str, id: impl ToString) -> Self {
        EngineError::NotFound {
            entity,
            id: id.to_string(),
        }
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::Validation { field, message } => write!(f, "{field}: {message}"),
            EngineError::Conflict(conflicts) => {
                let ids: Vec<&str> = conflicts.iter().map(|c| c.booking_id.as_str()).collect();
                write!(f, "time slot already taken by booking(s): {}", ids.join(", "))
            }
            EngineError::NotFound { entity, id } => write!(f, "{entity} not found: {id}"),
            EngineError::AlreadyExists { entity, id } => write!(f, "{entity} already exists: {id}"),
            EngineError::ReferencedBy {
                entity,
                id,
                bookings,
            } => write!(
                f,
                "cannot delete {entity} {id}: referenced by {} booking(s)",
                bookings.len()
            ),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::Storage(e) => write!(f, "storage error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
