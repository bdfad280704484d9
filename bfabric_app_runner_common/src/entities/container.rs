//! Projects and orders, the two kinds of container owning a workunit.

use crate::prelude::*;

entity_view!(
    /// A research project.
    Project,
    "project"
);

entity_view!(
    /// A service order, which may carry a FASTA sequence.
    Order,
    "order"
);

impl Order {
    /// The FASTA sequence attached to this order, if any.
    pub fn fasta_sequence(&self) -> Option<&str> {
        self.entity.str_field("fastasequence")
    }
}

/// The kind of a container.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerType {
    /// A [`Project`].
    Project,
    /// An [`Order`].
    Order,
}

impl ContainerType {
    /// Parse a LIMS class name.
    pub fn from_classname(classname: &str) -> Result<ContainerType> {
        match classname.to_ascii_lowercase().as_str() {
            "project" => Ok(ContainerType::Project),
            "order" => Ok(ContainerType::Order),
            other => Err(format_err!("unknown container classname: {:?}", other)),
        }
    }
}

impl fmt::Display for ContainerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContainerType::Project => "project".fmt(f),
            ContainerType::Order => "order".fmt(f),
        }
    }
}

/// A loaded container.
#[derive(Clone, Debug, PartialEq)]
pub enum Container {
    /// A project.
    Project(Project),
    /// An order.
    Order(Order),
}

impl Container {
    /// Load the container referenced by `field` of `owner`.
    pub fn load(lims: &Lims, owner: &super::Entity, field: &str) -> Result<Container> {
        let (container_type, id) = container_ref(owner, field)?;
        Ok(match container_type {
            ContainerType::Project => Container::Project(lims.find_required(id)?),
            ContainerType::Order => Container::Order(lims.find_required(id)?),
        })
    }

    /// The ID of this container.
    pub fn id(&self) -> i64 {
        match self {
            Container::Project(project) => project.id(),
            Container::Order(order) => order.id(),
        }
    }

    /// The kind of this container.
    pub fn container_type(&self) -> ContainerType {
        match self {
            Container::Project(_) => ContainerType::Project,
            Container::Order(_) => ContainerType::Order,
        }
    }
}

/// Read a container reference without loading it.
pub fn container_ref(owner: &super::Entity, field: &str) -> Result<(ContainerType, i64)> {
    let reference = owner.get(field).ok_or_else(|| {
        format_err!("{} {} has no {:?}", owner.classname(), owner.id(), field)
    })?;
    let classname = reference
        .get("classname")
        .and_then(|c| c.as_str())
        .ok_or_else(|| format_err!("container reference without classname: {}", reference))?;
    let id = owner
        .ref_id(field)
        .ok_or_else(|| format_err!("container reference without id: {}", reference))?;
    Ok((ContainerType::from_classname(classname)?, id))
}
