//! Diesel schema, declared by hand to match `migrations/` (replaceable with
//! `diesel print-schema` once a real database is available to introspect).

diesel::table! {
    orchestration_records (subject) {
        subject -> Text,
        parent_subject -> Nullable<Text>,
        record -> Jsonb,
        version -> BigInt,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    orchestration_locks (subject) {
        subject -> Text,
        locked_at -> Timestamptz,
    }
}

diesel::table! {
    orchestration_event_log (seq) {
        seq -> BigInt,
        subject -> Text,
        ts -> Timestamptz,
        record -> Jsonb,
    }
}

diesel::allow_tables_to_appear_in_same_query!(orchestration_records, orchestration_locks, orchestration_event_log,);
