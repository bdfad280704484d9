use crate::prelude::*;

entity_view!(
    /// A program registered in the LIMS, optionally with its contents.
    Executable,
    "executable"
);

impl Executable {
    /// The path of the executable, as registered.
    pub fn program(&self) -> Option<&str> {
        self.entity.str_field("program")
    }

    /// The decoded contents, if the executable carries a payload.
    pub fn decoded(&self) -> Result<Option<Vec<u8>>> {
        match self.entity.str_field("base64") {
            None => Ok(None),
            Some(encoded) => {
                let cleaned = encoded
                    .chars()
                    .filter(|c| !c.is_whitespace())
                    .collect::<String>();
                let bytes = base64::decode(&cleaned).with_context(|| {
                    format!("could not decode executable {}", self.entity.id())
                })?;
                Ok(Some(bytes))
            }
        }
    }
}

#[test]
fn decodes_base64_payload() {
    let exec = Executable::from_entity(
        super::Entity::from_json(
            "executable",
            serde_json::json!({"id": 3, "base64": "ZWNobyBo\naQ=="}),
        )
        .unwrap(),
    );
    assert_eq!(exec.decoded().unwrap(), Some(b"echo hi".to_vec()));
}
