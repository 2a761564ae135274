// Esquema Diesel del cache local (SQLite).
// Los instantes se guardan como milisegundos epoch UTC.
diesel::table! {
    correlativos (seq) {
        seq -> BigInt,
        value -> Text,
        state -> Text,
        origin -> Text,
        batch_id -> Nullable<Text>,
        reserved_at_ts -> Nullable<BigInt>,
        issued_at_ts -> Nullable<BigInt>,
        voided_at_ts -> Nullable<BigInt>,
        void_reason -> Nullable<Text>,
        metadata -> Nullable<Text>,
        synced -> Bool,
        reconciled -> Bool,
        conflict -> Nullable<Text>,
    }
}
