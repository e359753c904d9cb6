//! Prompt templates. Pure string construction: same inputs, byte-identical
//! output. The quoting instructions are part of the contract with the model.

/// Phase one: ask the model which tables matter for the question.
pub fn build_table_selection_prompt(table_names: &[String], question: &str) -> String {
    format!(
        "You are a data analyst working at a company. You are given a list of tables in a database schema:\n\
===== LIST START =====\n\
{}\n\
===== LIST END =====\n\
Your boss asks you to point out the tables in the schema that are relevant to the following inquery (so that they can be used in a SQL query):\n\
\"{}\"\n\
\n\
Please write the names of the tables that are relevant to the inquery. Return only the names of the tables, nothing else.\n\
Use the following format: \"table1, table2, table3\". If there are no relevant tables, return \"none\". Return only the names of the tables, nothing else.\n\
Max 5 tables.\n",
        table_names.join("\n"),
        question
    )
}

/// Phase two: ask the model for the SQL statement itself, given the filtered
/// schema rendered as pseudo-DDL.
pub fn build_query_prompt(statements: &[String], question: &str, dialect: &str) -> String {
    format!(
        "You are a data analyst working at a company. You are given a {dialect} database schema with the following tables:\n\
===== SCHEMA START =====\n\
{schema}\n\
===== SCHEMA END =====\n\
Your boss asks you to write a SQL query which will return the data satisfying the following inquery:\n\
\"{question}\"\n\
\n\
Please write the SQL query your boss asks for. It should be correct, correspond to the schema above and {dialect} syntax. Remember to use the correct table names and column names.\n\
Please wrap all table names and column names in quotes (e.g. \"table_name\" or \"columnName\").\n\
Pay extra attention to the quotes if you see a column name or table name in camelCase (it should be \"emailVerified\" in the result SQL query, not emailVerified or emailverified or \"emailverified\").\n\
Return only the SQL query, nothing else.\n",
        dialect = dialect,
        schema = statements.join("\n"),
        question = question
    )
}
