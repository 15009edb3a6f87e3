//! Database sites: `(schema, table, optional column)`.

use std::cmp::Ordering;
use std::fmt;

/// A site in the database: a table, or one column of a table.
///
/// Table and column names are folded to upper case so that rule sets can be
/// written without caring how the catalog spells identifiers. Side tables
/// derive their names from these upper-case forms.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableField {
    schema: String,
    table: String,
    column: Option<String>,
}

impl TableField {
    pub fn new(schema: impl Into<String>, table: &str, column: Option<&str>) -> Self {
        Self {
            schema: schema.into(),
            table: table.trim().to_uppercase(),
            column: column
                .map(str::trim)
                .filter(|c| !c.is_empty())
                .map(str::to_uppercase),
        }
    }

    /// Parse `TABLE` or `TABLE.COLUMN` within `schema`
    pub fn parse(schema: &str, site: &str) -> Self {
        match site.split_once('.') {
            Some((table, column)) => Self::new(schema, table, Some(column)),
            None => Self::new(schema, site, None),
        }
    }

    pub fn schema(&self) -> &str {
        &self.schema
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn column(&self) -> Option<&str> {
        self.column.as_deref()
    }

    /// Whether this site designates whole rows
    pub fn is_whole_row(&self) -> bool {
        self.column.is_none()
    }

    /// Name of the side table holding mappings for this site, `<TABLE>_<COLUMN>`
    pub fn side_table_name(&self) -> String {
        match &self.column {
            Some(column) => format!("{}_{column}", self.table),
            None => self.table.clone(),
        }
    }
}

/// Split a name into the part before a trailing run of digits and that number.
fn split_numeric_suffix(name: &str) -> (&str, Option<u128>) {
    let digits = name.bytes().rev().take_while(u8::is_ascii_digit).count();
    if digits == 0 {
        return (name, None);
    }
    let (prefix, suffix) = name.split_at(name.len() - digits);
    (prefix, suffix.parse().ok())
}

/// Compare names so that `TABLE2` sorts before `TABLE10`.
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    let (prefix_a, num_a) = split_numeric_suffix(a);
    let (prefix_b, num_b) = split_numeric_suffix(b);
    prefix_a
        .cmp(prefix_b)
        .then_with(|| num_a.cmp(&num_b))
        .then_with(|| a.cmp(b))
}

impl Ord for TableField {
    fn cmp(&self, other: &Self) -> Ordering {
        self.schema
            .cmp(&other.schema)
            .then_with(|| natural_cmp(&self.table, &other.table))
            .then_with(|| match (&self.column, &other.column) {
                (None, None) => Ordering::Equal,
                (None, Some(_)) => Ordering::Less,
                (Some(_), None) => Ordering::Greater,
                (Some(a), Some(b)) => natural_cmp(a, b),
            })
    }
}

impl PartialOrd for TableField {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for TableField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.column {
            Some(column) => write!(f, "{}.{}.{column}", self.schema, self.table),
            None => write!(f, "{}.{}", self.schema, self.table),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_suffix_ordering() {
        let t2 = TableField::new("public", "TABLE2", None);
        let t10 = TableField::new("public", "TABLE10", None);
        assert!(t2 < t10);
        assert!(TableField::new("public", "TABLE", None) < t2);
    }

    #[test]
    fn test_whole_row_sorts_before_columns() {
        let row = TableField::new("public", "VISITOR", None);
        let col = TableField::new("public", "VISITOR", Some("ID"));
        assert!(row < col);
        assert!(row.is_whole_row());
        assert!(!col.is_whole_row());
    }

    #[test]
    fn test_schema_orders_first() {
        let a = TableField::new("a", "Z", None);
        let b = TableField::new("b", "A", None);
        assert!(a < b);
    }

    #[test]
    fn test_parse_and_case_folding() {
        let f = TableField::parse("public", "visitor.surname");
        assert_eq!(f.table(), "VISITOR");
        assert_eq!(f.column(), Some("SURNAME"));
        assert_eq!(f, TableField::new("public", "VISITOR", Some("SURNAME")));
        assert_eq!(f.side_table_name(), "VISITOR_SURNAME");
        assert_eq!(f.to_string(), "public.VISITOR.SURNAME");
        assert!(TableField::parse("public", "visitor").is_whole_row());
    }
}
