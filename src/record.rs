use diesel::{prelude::*, sqlite::Sqlite};

/// A row the engine can write back or delete wholesale.
///
/// Mutation flows load a record, edit its fields in Rust and hand the
/// whole thing back to [`Record::persist`], which upserts under the
/// record's key columns. `TABLE` and `KEY_COLUMNS` document the mapping;
/// every field of the struct is stored, so a typo'd field name is a
/// compile error rather than a runtime lookup failure.
pub trait Record {
    const TABLE: &'static str;
    const KEY_COLUMNS: &'static [&'static str];

    fn persist(
        &self,
        conn: &mut impl Connection<Backend = Sqlite>,
    ) -> QueryResult<()>;

    fn remove(
        &self,
        conn: &mut impl Connection<Backend = Sqlite>,
    ) -> QueryResult<()>;
}
