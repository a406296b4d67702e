use std::collections::BTreeMap;

use spc_domain::Revision;
use time::OffsetDateTime;

use crate::core::{
    config::StorageSettings,
    errors::{Result, StorageError},
};

const CC0_FRAME: &str = include_str!("../../../templates/license-cc0.txt");
const BSD_FRAME: &str = include_str!("../../../templates/license-bsd.txt");

/// Variables available to a license template, keyed by their dotted name.
pub type LicenseContext = BTreeMap<String, String>;

/// Fills `{{ name }}` placeholders in license templates.
pub trait LicenseRenderer: Send + Sync {
    fn render(&self, template: &str, context: &LicenseContext) -> String;
}

/// Plain substitution of `{{ name }}` fields; unknown names render empty.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlaceholderRenderer;

impl LicenseRenderer for PlaceholderRenderer {
    fn render(&self, template: &str, context: &LicenseContext) -> String {
        let mut out = String::with_capacity(template.len());
        let mut rest = template;
        while let Some(start) = rest.find("{{") {
            out.push_str(&rest[..start]);
            let after = &rest[start + 2..];
            let Some(end) = after.find("}}") else {
                out.push_str(&rest[start..]);
                return out;
            };
            let key = after[..end].trim();
            if let Some(value) = context.get(key) {
                out.push_str(value);
            }
            rest = &after[end + 2..];
        }
        out.push_str(rest);
        out
    }
}

/// Text of the license file committed alongside a revision's content.
///
/// Only `cc0` and `bsd` have frames; any other slug is rejected before
/// anything is written.
pub fn render_license(
    renderer: &dyn LicenseRenderer,
    revision: &Revision,
    settings: &StorageSettings,
    now: OffsetDateTime,
) -> Result<String> {
    let license = &revision.license;
    let (inner_context, frame, inner_key) = match license.slug.as_str() {
        "cc0" => (LicenseContext::new(), CC0_FRAME, "license_cc0"),
        "bsd" => {
            let mut context = LicenseContext::new();
            context.insert("year".into(), now.year().to_string());
            context.insert(
                "copyright_holder".into(),
                copyright_holder(&settings.short_url_root, &revision.created_by.profile_url),
            );
            (context, BSD_FRAME, "license_bsd")
        }
        other => {
            return Err(StorageError::UnsupportedLicense {
                slug: other.to_string(),
            })
        }
    };
    let inner = renderer.render(&license.text_template, &inner_context);

    let mut context = LicenseContext::new();
    context.insert("obj.title".into(), revision.title.clone());
    context.insert("obj.slug".into(), revision.slug());
    context.insert("obj.author".into(), revision.created_by.username.clone());
    context.insert("obj.license".into(), license.name.clone());
    context.insert("url_domain".into(), settings.short_url_root.clone());
    context.insert(inner_key.into(), inner.trim_end().to_string());
    Ok(renderer.render(frame, &context))
}

fn copyright_holder(root: &str, profile_url: &str) -> String {
    format!(
        "{}/{}",
        root.trim_end_matches('/'),
        profile_url.trim_start_matches('/')
    )
}
