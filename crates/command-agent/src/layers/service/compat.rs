use std::sync::OnceLock;

use agent_protocol::DocumentState;
use anyhow::bail;
use regex::Regex;

use crate::layers::document::map_strings;

/// Public documents that read the region from instance metadata, which a
/// managed (non-EC2) instance does not serve.
pub const DEFAULT_INCOMPATIBLE_DOCUMENTS: &[&str] = &["AWS-ApplyPatchBaseline"];

/// Rewrites metadata-service lookups in known documents when running on a
/// managed instance.
#[derive(Debug, Clone, Default)]
pub struct ManagedInstanceCompat {
    pub managed_instance: bool,
    pub region: Option<String>,
    pub incompatible_documents: Vec<String>,
}

fn metadata_lookup() -> &'static Regex {
    static LOOKUP: OnceLock<Regex> = OnceLock::new();
    LOOKUP.get_or_init(|| {
        Regex::new(r"\$\([^()]*169\.254\.169\.254[^()]*\)").expect("metadata lookup regex")
    })
}

impl ManagedInstanceCompat {
    pub fn applies_to(&self, document_name: &str) -> bool {
        self.managed_instance
            && self
                .incompatible_documents
                .iter()
                .any(|name| name == document_name)
    }

    /// Returns whether the document was rewritten.
    pub fn apply(&self, state: &mut DocumentState) -> anyhow::Result<bool> {
        let document_name = state.document_information.document_name.clone();
        if !self.applies_to(&document_name) {
            return Ok(false);
        }
        let Some(region) = self.region.as_deref().filter(|region| !region.is_empty()) else {
            bail!("managed instance has no region configured, cannot run {document_name}");
        };
        tracing::debug!(
            event = "compat.rewrite",
            document = %document_name,
            region,
            "replacing instance metadata lookups"
        );
        for plugin in &mut state.instance_plugins_information {
            map_strings(&mut plugin.configuration.properties, &mut |text| {
                if metadata_lookup().is_match(text.as_str()) {
                    let rewritten = metadata_lookup()
                        .replace_all(text.as_str(), regex::NoExpand(region))
                        .into_owned();
                    *text = rewritten;
                }
            });
        }
        Ok(true)
    }
}
