use crate::prelude::*;

entity_view!(
    /// A URL attached to another entity.
    Link,
    "link"
);

impl Link {
    /// The link text.
    pub fn name(&self) -> Option<&str> {
        self.entity.str_field("name")
    }

    /// The target URL.
    pub fn url(&self) -> Option<&str> {
        self.entity.str_field("url")
    }
}
