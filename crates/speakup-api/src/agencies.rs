use std::sync::Arc;

use speakup_db::Database;
use speakup_types::models::Agency;

use crate::error::ApiError;

/// Read-only list of government agencies feedback can be addressed to.
/// Seeded by migration.
#[derive(Clone)]
pub struct AgencyCatalog {
    db: Arc<Database>,
}

impl AgencyCatalog {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub fn list(&self, department: Option<&str>) -> Result<Vec<Agency>, ApiError> {
        let department = department.map(str::trim).filter(|d| !d.is_empty());
        let agencies = self
            .db
            .list_agencies(department)?
            .into_iter()
            .map(|row| row.into_agency())
            .collect::<anyhow::Result<Vec<_>>>()?;
        Ok(agencies)
    }

    /// Codes are matched case-insensitively; the seed data stores them upper case.
    pub fn get(&self, code: &str) -> Result<Agency, ApiError> {
        let row = self
            .db
            .get_agency_by_code(&code.trim().to_ascii_uppercase())?
            .ok_or(ApiError::NotFound("Agency"))?;
        Ok(row.into_agency()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> AgencyCatalog {
        AgencyCatalog::new(Arc::new(Database::open_in_memory().unwrap()))
    }

    #[test]
    fn filters_by_department() {
        let catalog = catalog();
        let all = catalog.list(None).unwrap();
        let health = catalog.list(Some("Health")).unwrap();
        assert!(!health.is_empty());
        assert!(health.len() < all.len());
        assert!(health.iter().all(|a| a.department == "Health"));
        assert_eq!(catalog.list(Some("  ")).unwrap().len(), all.len());
    }

    #[test]
    fn lookup_by_code() {
        let catalog = catalog();
        assert_eq!(catalog.get("lta").unwrap().code, "LTA");
        assert!(matches!(catalog.get("NOPE"), Err(ApiError::NotFound("Agency"))));
    }
}
