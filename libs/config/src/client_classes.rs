//! # Client Classes

use anyhow::{Context, Result};
use client_classification::{ast, Expr};
use proto::v4::Message;

use crate::wire;

/// the compiled class table; expressions are parsed once at config time
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ClientClasses {
    pub(crate) classes: Vec<ClientClass>,
}

/// one named predicate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientClass {
    pub(crate) name: String,
    pub(crate) assert: Expr,
}

impl ClientClass {
    /// class name
    pub fn name(&self) -> &str {
        &self.name
    }
    /// compiled predicate
    pub fn assert(&self) -> &Expr {
        &self.assert
    }
}

impl ClientClasses {
    /// compile the wire class list
    pub fn from_wire(cfg: Vec<wire::client_classes::ClientClass>) -> Result<Self> {
        let mut classes = Vec::with_capacity(cfg.len());
        for class in cfg.into_iter() {
            let assert = ast::parse(&class.test)
                .with_context(|| format!("failed to parse client class {}", class.name))?;
            classes.push(ClientClass {
                name: class.name,
                assert,
            });
        }
        Ok(Self { classes })
    }

    /// find a class by name
    pub fn find(&self, name: &str) -> Option<&ClientClass> {
        self.classes.iter().find(|class| class.name == name)
    }

    /// Apply every class in insertion order; the returned names are the
    /// packet's class set.
    pub fn eval(&self, msg: &Message) -> Vec<String> {
        self.classes
            .iter()
            .filter(|class| ast::eval(&class.assert, msg))
            .map(|class| class.name.clone())
            .collect()
    }
}
