// SQLite schema definitions. Ids are INTEGER (i32 in diesel) and timestamps
// are RFC 3339 text; the store layer converts both to the API types.

diesel::table! {
    users (id) {
        id -> Integer,
        username -> Text,
        password_hash -> Text,
        role -> Text,
        assigned_subject_id -> Nullable<Integer>,
        created_at -> Text,
        updated_at -> Text,
    }
}

diesel::table! {
    subjects (id) {
        id -> Integer,
        name -> Text,
        description -> Nullable<Text>,
        created_at -> Text,
        updated_at -> Text,
    }
}

diesel::table! {
    content (id) {
        id -> Integer,
        title -> Text,
        body -> Text,
        #[sql_name = "type"]
        kind -> Text,
        subject_id -> Nullable<Integer>,
        author_id -> Nullable<Integer>,
        media_urls -> Text,
        created_at -> Text,
        updated_at -> Text,
    }
}

diesel::table! {
    files (id) {
        id -> Integer,
        content_id -> Integer,
        filename -> Text,
        stored_filename -> Text,
        mime_type -> Text,
        size -> BigInt,
        created_at -> Text,
    }
}

diesel::table! {
    schema_migrations (version) {
        version -> Integer,
        applied_at -> Text,
    }
}

diesel::allow_tables_to_appear_in_same_query!(users, subjects, content, files);
