use k8s_openapi::{apimachinery::pkg::apis::meta::v1::ObjectMeta, Metadata};

pub trait RequireMetadata<E> {
    fn require_name_or(&self, error: E) -> Result<&str, E>;
}

impl<T: Metadata<Ty = ObjectMeta>, E> RequireMetadata<E> for T {
    fn require_name_or(&self, error: E) -> Result<&str, E> {
        Ok(self.metadata().name.as_ref().ok_or(error)?.as_str())
    }
}

pub trait NonEmpty {
    fn non_empty(self) -> Self;
}

impl<T: AsRef<str>> NonEmpty for Option<T> {
    /// Treats an empty string the same as a missing one.
    fn non_empty(self) -> Self {
        self.filter(|value| !value.as_ref().is_empty())
    }
}
