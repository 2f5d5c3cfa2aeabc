use std::sync::Arc;

use crate::chain::validate_identifier;
use crate::error::WhenResult;

#[derive(Debug, Clone)]
struct SchemaInner {
    type_name: String,
    notifying: Vec<String>,
}

/// Per-type table of self-notifying fields.
///
/// Build it once per model type and keep it in a `OnceLock`:
///
/// ```
/// use std::sync::OnceLock;
/// use notify_chain::ModelSchema;
///
/// fn schema() -> &'static ModelSchema {
///     static SCHEMA: OnceLock<ModelSchema> = OnceLock::new();
///     SCHEMA.get_or_init(|| {
///         ModelSchema::new("Todo")
///             .notify_for(["title", "done"])
///             .expect("valid field names")
///     })
/// }
///
/// assert!(schema().is_notifying("done"));
/// ```
#[derive(Debug, Clone)]
pub struct ModelSchema {
    inner: Arc<SchemaInner>,
}

impl ModelSchema {
    /// A schema with no notifying fields.
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(SchemaInner {
                type_name: type_name.into(),
                notifying: Vec::new(),
            }),
        }
    }

    /// Declares self-notifying fields. Declaring a field twice is a no-op.
    pub fn notify_for<I, S>(mut self, fields: I) -> WhenResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let inner = Arc::make_mut(&mut self.inner);
        for field in fields {
            let field = field.as_ref();
            validate_identifier(field)?;
            if !inner.notifying.iter().any(|f| f == field) {
                inner.notifying.push(field.to_string());
            }
        }
        Ok(self)
    }

    /// Name of the model type, used in errors and logs.
    #[must_use]
    pub fn type_name(&self) -> &str {
        &self.inner.type_name
    }

    /// Whether `field` was declared self-notifying.
    #[must_use]
    pub fn is_notifying(&self, field: &str) -> bool {
        self.inner.notifying.iter().any(|f| f == field)
    }

    /// Declared fields, in declaration order.
    #[must_use]
    pub fn fields(&self) -> &[String] {
        &self.inner.notifying
    }
}
