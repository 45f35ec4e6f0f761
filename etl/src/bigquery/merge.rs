use crate::bail;
use crate::bigquery::client::quote_identifier;
use crate::error::{ErrorKind, EtlResult};

/// Builds the `MERGE` statement upserting `staging_table` into `final_table` by `id_column`.
///
/// Both table names must already be fully qualified and quoted. Matched rows get every
/// non-id column updated and unmatched rows are inserted. When the id is the only column
/// there is nothing to update and the `when matched` clause is left out.
pub fn merge_statement(
    final_table: &str,
    staging_table: &str,
    id_column: &str,
    columns: &[String],
) -> EtlResult<String> {
    if !columns.iter().any(|column| column == id_column) {
        bail!(
            ErrorKind::ValidationError,
            "Merge id column is not among the merged columns",
            format!("column `{id_column}`")
        );
    }

    let id = quote_identifier(id_column, "BigQuery merge id column")?;
    let quoted = columns
        .iter()
        .map(|column| quote_identifier(column, "BigQuery column name"))
        .collect::<EtlResult<Vec<_>>>()?;

    let set_clause = columns
        .iter()
        .zip(&quoted)
        .filter(|(column, _)| *column != id_column)
        .map(|(_, quoted)| format!("T.{quoted} = S.{quoted}"))
        .collect::<Vec<_>>()
        .join(", ");
    let insert_columns = quoted.join(", ");
    let insert_values = quoted
        .iter()
        .map(|quoted| format!("S.{quoted}"))
        .collect::<Vec<_>>()
        .join(", ");

    let mut statement = format!(
        "merge {final_table} T\nusing {staging_table} S\non T.{id} = S.{id}\n"
    );
    if !set_clause.is_empty() {
        statement.push_str(&format!("when matched then\n  update set {set_clause}\n"));
    }
    statement.push_str(&format!(
        "when not matched then\n  insert ({insert_columns})\n  values ({insert_values})"
    ));

    Ok(statement)
}
