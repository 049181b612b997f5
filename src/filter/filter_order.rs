use super::error::FilterError;
use super::filter_where::{quote_identifier, validate_column};
use super::types::OrderBy;

pub struct FilterOrder;

impl FilterOrder {
    pub fn generate(infos: &[OrderBy]) -> Result<String, FilterError> {
        if infos.is_empty() {
            return Ok(String::new());
        }
        let mut parts = Vec::with_capacity(infos.len());
        for info in infos {
            validate_column(&info.column)?;
            parts.push(format!("{} {}", quote_identifier(&info.column), info.sort.to_sql()));
        }
        Ok(format!("ORDER BY {}", parts.join(", ")))
    }

    /// REST form: `created_at.desc,id.asc`.
    pub fn generate_rest(infos: &[OrderBy]) -> Result<Option<String>, FilterError> {
        if infos.is_empty() {
            return Ok(None);
        }
        let mut parts = Vec::with_capacity(infos.len());
        for info in infos {
            validate_column(&info.column)?;
            parts.push(format!("{}.{}", info.column, info.sort.to_rest()));
        }
        Ok(Some(parts.join(",")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::types::SortDirection;

    #[test]
    fn generates_sql_and_rest_ordering() {
        let infos = vec![
            OrderBy { column: "created_at".into(), sort: SortDirection::Desc },
            OrderBy { column: "id".into(), sort: SortDirection::Asc },
        ];
        assert_eq!(FilterOrder::generate(&infos).unwrap(), "ORDER BY \"created_at\" DESC, \"id\" ASC");
        assert_eq!(FilterOrder::generate_rest(&infos).unwrap().as_deref(), Some("created_at.desc,id.asc"));
    }

    #[test]
    fn no_ordering_is_empty() {
        assert_eq!(FilterOrder::generate(&[]).unwrap(), "");
        assert_eq!(FilterOrder::generate_rest(&[]).unwrap(), None);
    }
}
