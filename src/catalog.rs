//! Template library collaborator.
//!
//! Plan items point at external library entries (drugs, checkups,
//! questionnaires, monitoring templates) by [`TemplateId`] only. The core never
//! walks that reference structurally; it asks a [`TemplateCatalog`] for the two
//! facts it needs: which report type a checkup template closes on, and which
//! template a monitoring metric code belongs to.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::id::TemplateId;
use crate::task::ReportType;

/// Read-only view of the template libraries.
pub trait TemplateCatalog: Send + Sync {
    /// Report type a checkup template inherits into its tasks.
    fn checkup_report_type(&self, template: TemplateId) -> Option<ReportType>;

    /// Monitoring template owning a metric code such as `M_BP`.
    fn monitoring_template(&self, metric_code: &str) -> Option<TemplateId>;
}

/// A monitoring template entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringTemplate {
    pub id: u64,
    pub code: String,
    pub name: String,
}

/// A checkup library entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckupTemplate {
    pub id: u64,
    pub code: String,
    pub name: String,
    #[serde(default)]
    pub related_report_type: Option<u16>,
}

/// Catalog backed by lists in the TOML config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StaticCatalog {
    #[serde(default)]
    pub monitoring: Vec<MonitoringTemplate>,
    #[serde(default)]
    pub checkup: Vec<CheckupTemplate>,
    #[serde(skip)]
    index: Option<CatalogIndex>,
}

#[derive(Debug, Clone, Default)]
struct CatalogIndex {
    by_code: HashMap<String, TemplateId>,
    report_types: HashMap<TemplateId, ReportType>,
}

impl StaticCatalog {
    pub fn new(monitoring: Vec<MonitoringTemplate>, checkup: Vec<CheckupTemplate>) -> Self {
        Self {
            monitoring,
            checkup,
            index: None,
        }
        .indexed()
    }

    /// Build lookup maps. Called after deserialization.
    pub fn indexed(mut self) -> Self {
        let by_code = self
            .monitoring
            .iter()
            .filter_map(|m| TemplateId::new(m.id).map(|id| (m.code.to_uppercase(), id)))
            .collect();
        let report_types = self
            .checkup
            .iter()
            .filter_map(|c| {
                let id = TemplateId::new(c.id)?;
                Some((id, ReportType(c.related_report_type?)))
            })
            .collect();
        self.index = Some(CatalogIndex {
            by_code,
            report_types,
        });
        self
    }
}

impl TemplateCatalog for StaticCatalog {
    fn checkup_report_type(&self, template: TemplateId) -> Option<ReportType> {
        match &self.index {
            Some(idx) => idx.report_types.get(&template).copied(),
            None => self
                .checkup
                .iter()
                .find(|c| c.id == template.get())
                .and_then(|c| c.related_report_type.map(ReportType)),
        }
    }

    fn monitoring_template(&self, metric_code: &str) -> Option<TemplateId> {
        let code = metric_code.to_uppercase();
        match &self.index {
            Some(idx) => idx.by_code.get(&code).copied(),
            None => self
                .monitoring
                .iter()
                .find(|m| m.code.to_uppercase() == code)
                .and_then(|m| TemplateId::new(m.id)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> StaticCatalog {
        StaticCatalog::new(
            vec![
                MonitoringTemplate {
                    id: 10,
                    code: "M_BP".into(),
                    name: "Blood pressure".into(),
                },
                MonitoringTemplate {
                    id: 11,
                    code: "M_TEMP".into(),
                    name: "Body temperature".into(),
                },
            ],
            vec![CheckupTemplate {
                id: 20,
                code: "CT_CHEST".into(),
                name: "Chest CT".into(),
                related_report_type: Some(3),
            }],
        )
    }

    #[test]
    fn metric_code_lookup_is_case_insensitive() {
        let c = catalog();
        assert_eq!(c.monitoring_template("m_bp"), TemplateId::new(10));
        assert_eq!(c.monitoring_template("M_SPO2"), None);
    }

    #[test]
    fn checkup_report_type_lookup() {
        let c = catalog();
        assert_eq!(
            c.checkup_report_type(TemplateId::new(20).unwrap()),
            Some(ReportType(3))
        );
        assert_eq!(c.checkup_report_type(TemplateId::new(99).unwrap()), None);
    }

    #[test]
    fn unindexed_catalog_still_answers() {
        let raw: StaticCatalog = toml::from_str(
            r#"
            [[monitoring]]
            id = 5
            code = "M_WEIGHT"
            name = "Weight"
            "#,
        )
        .unwrap();
        assert_eq!(raw.monitoring_template("M_WEIGHT"), TemplateId::new(5));
    }
}
