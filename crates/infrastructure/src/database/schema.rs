// Database schema for user accounts
diesel::table! {
    users (id) {
        id -> Integer,
        username -> Text,          // unique
        email -> Text,             // unique
        password_hash -> Text,     // bcrypt output, never plaintext
        created_at -> Timestamp,
        updated_at -> Timestamp,
    }
}

diesel::table! {
    user_friends (user_id, position) {
        user_id -> Integer,
        position -> Integer,       // keeps list order
        friend_id -> Integer,      // weak reference, no foreign key
    }
}

diesel::table! {
    user_thoughts (user_id, position) {
        user_id -> Integer,
        position -> Integer,
        thought_id -> Integer,     // weak reference to an external thought
    }
}

diesel::joinable!(user_friends -> users (user_id));
diesel::joinable!(user_thoughts -> users (user_id));

diesel::allow_tables_to_appear_in_same_query!(users, user_friends, user_thoughts,);

/// DDL matching the `table!` definitions above. Unique indexes on
/// `username` and `email` are what actually guarantee uniqueness.
pub const CREATE_TABLES_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    username TEXT NOT NULL,
    email TEXT NOT NULL,
    password_hash TEXT NOT NULL,
    created_at TIMESTAMP NOT NULL,
    updated_at TIMESTAMP NOT NULL
);
CREATE UNIQUE INDEX IF NOT EXISTS users_username_unique ON users (username);
CREATE UNIQUE INDEX IF NOT EXISTS users_email_unique ON users (email);

CREATE TABLE IF NOT EXISTS user_friends (
    user_id INTEGER NOT NULL REFERENCES users (id) ON DELETE CASCADE,
    position INTEGER NOT NULL,
    friend_id INTEGER NOT NULL,
    PRIMARY KEY (user_id, position)
);

CREATE TABLE IF NOT EXISTS user_thoughts (
    user_id INTEGER NOT NULL REFERENCES users (id) ON DELETE CASCADE,
    position INTEGER NOT NULL,
    thought_id INTEGER NOT NULL,
    PRIMARY KEY (user_id, position)
);
"#;
