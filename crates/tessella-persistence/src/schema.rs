//! Diesel table declarations (hand-written; replaceable with
//! `diesel print-schema`).
//!
//! Tables:
//! - `tessellae`: the append-only fact log, globally ordered by `id`.
//! - `inputs`: the `input` audit row recorded before an action's bindings
//!   are validated.
//! - `actions_taken`: the `action_taken` audit row recorded once an action's
//!   side effects have all committed.

diesel::table! {
    tessellae (id) {
        id -> BigInt,
        res_id -> Text,
        branch_id -> Text,
        fact_type -> Text,
        payload -> Jsonb,
        source -> Nullable<Text>,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    inputs (id) {
        id -> BigInt,
        kind -> Text,
        source -> Nullable<Text>,
        data -> Jsonb,
        branch_id -> Text,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    actions_taken (id) {
        id -> BigInt,
        action_genus_id -> Text,
        input_id -> BigInt,
        resources -> Jsonb,
        params -> Jsonb,
        tessellae_ids -> Jsonb,
        branch_id -> Text,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    serialization_runs (id) {
        id -> BigInt,
        target_genus_id -> Text,
        direction -> Text,
        entity_ids -> Jsonb,
        output_path -> Nullable<Text>,
        tessellae_created -> Jsonb,
        branch_id -> Text,
        created_at -> Timestamptz,
    }
}

diesel::allow_tables_to_appear_in_same_query!(tessellae, inputs, actions_taken, serialization_runs,);
