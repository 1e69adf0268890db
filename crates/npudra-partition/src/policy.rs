//! Template selection policies.
//!
//! - **Best fit**: the qualifying template with the smallest total surplus
//! - **Eligibility**: which templates a partially carved card still offers

use npudra_core::config::TemplateEligibility;
use npudra_core::{Template, TemplateCatalog};

use crate::slice::PhysicalNpu;

/// Pick the template with the least surplus over the requested minimums.
///
/// Ties are broken by ascending (AI core, memory, name) so the winner does
/// not depend on iteration order.
pub fn best_fit(templates: &TemplateCatalog, ai_core: u32, memory_gb: u32) -> Option<&Template> {
    let mut candidates: Vec<&Template> = templates
        .iter()
        .filter(|t| t.satisfies(ai_core, memory_gb))
        .collect();
    candidates.sort_by(|a, b| {
        (a.ai_core, a.memory_gb, &a.name).cmp(&(b.ai_core, b.memory_gb, &b.name))
    });
    candidates
        .into_iter()
        .min_by_key(|t| t.surplus(ai_core, memory_gb))
}

/// Templates the card should offer given what is allocated on it.
pub fn eligible_templates(
    policy: &TemplateEligibility,
    catalog: &TemplateCatalog,
    npu: &PhysicalNpu,
) -> TemplateCatalog {
    if npu.is_whole() {
        return catalog.clone();
    }
    match policy {
        TemplateEligibility::All => catalog.clone(),
        TemplateEligibility::Prefix { prefix } => catalog.filtered(|t| t.name.starts_with(prefix.as_str())),
        TemplateEligibility::Capacity => {
            let remaining = npu.remaining_capacity(catalog);
            catalog.filtered(|t| t.ai_core <= remaining.ai_core && t.memory_gb <= remaining.memory_gb)
        }
    }
}
