use crate::database::{user_friends, user_thoughts, users, SqlitePool};
use async_trait::async_trait;
use chrono::{NaiveDateTime, Utc};
use diesel::dsl::{exists, max};
use diesel::prelude::*;
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use domain::{
    DomainError, PasswordHash, RelationChange, ThoughtId, User, UserId, UserPatch, UserRepository,
};
use std::collections::HashMap;
use tracing::debug;

// Database model - separate from domain entity
#[derive(Queryable, Selectable, Debug)]
#[diesel(table_name = users)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
struct UserModel {
    id: i32,
    username: String,
    email: String,
    password_hash: String,
    created_at: NaiveDateTime,
    updated_at: NaiveDateTime,
}

#[derive(Insertable)]
#[diesel(table_name = users)]
struct NewUserModel {
    username: String,
    email: String,
    password_hash: String,
    created_at: NaiveDateTime,
    updated_at: NaiveDateTime,
}

// `None` fields are left out of the UPDATE
#[derive(AsChangeset)]
#[diesel(table_name = users)]
struct UserChangeset<'a> {
    username: Option<&'a str>,
    email: Option<&'a str>,
    password_hash: Option<&'a str>,
    updated_at: NaiveDateTime,
}

#[derive(Queryable, Selectable, Insertable, Debug)]
#[diesel(table_name = user_friends)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
struct FriendRow {
    user_id: i32,
    position: i32,
    friend_id: i32,
}

#[derive(Queryable, Selectable, Insertable, Debug)]
#[diesel(table_name = user_thoughts)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
struct ThoughtRow {
    user_id: i32,
    position: i32,
    thought_id: i32,
}

impl From<&User> for NewUserModel {
    fn from(user: &User) -> Self {
        NewUserModel {
            username: user.username.clone(),
            email: user.email.clone(),
            password_hash: user.password_hash.as_str().to_string(),
            created_at: user.created_at.naive_utc(),
            updated_at: user.updated_at.naive_utc(),
        }
    }
}

impl UserModel {
    fn into_user(self, friends: Vec<UserId>, thoughts: Vec<ThoughtId>) -> User {
        User {
            id: Some(UserId(self.id)),
            username: self.username,
            email: self.email,
            password_hash: PasswordHash::from_stored(self.password_hash),
            thoughts,
            friends,
            created_at: self.created_at.and_utc(),
            updated_at: self.updated_at.and_utc(),
        }
    }
}

/// Attach the ordered relation lists to a batch of user rows.
fn hydrate(conn: &mut SqliteConnection, models: Vec<UserModel>) -> QueryResult<Vec<User>> {
    let ids: Vec<i32> = models.iter().map(|m| m.id).collect();

    let mut friends: HashMap<i32, Vec<UserId>> = HashMap::new();
    for row in user_friends::table
        .filter(user_friends::user_id.eq_any(ids.clone()))
        .order((user_friends::user_id.asc(), user_friends::position.asc()))
        .select(FriendRow::as_select())
        .load::<FriendRow>(conn)?
    {
        friends.entry(row.user_id).or_default().push(UserId(row.friend_id));
    }

    let mut thoughts: HashMap<i32, Vec<ThoughtId>> = HashMap::new();
    for row in user_thoughts::table
        .filter(user_thoughts::user_id.eq_any(ids))
        .order((user_thoughts::user_id.asc(), user_thoughts::position.asc()))
        .select(ThoughtRow::as_select())
        .load::<ThoughtRow>(conn)?
    {
        thoughts.entry(row.user_id).or_default().push(ThoughtId(row.thought_id));
    }

    Ok(models
        .into_iter()
        .map(|model| {
            let id = model.id;
            model.into_user(
                friends.remove(&id).unwrap_or_default(),
                thoughts.remove(&id).unwrap_or_default(),
            )
        })
        .collect())
}

fn load_one(conn: &mut SqliteConnection, model: Option<UserModel>) -> QueryResult<Option<User>> {
    match model {
        Some(model) => Ok(hydrate(conn, vec![model])?.pop()),
        None => Ok(None),
    }
}

/// Insert the relation rows of a freshly inserted user.
fn insert_relations(conn: &mut SqliteConnection, user_id: i32, user: &User) -> QueryResult<()> {
    let friend_rows: Vec<FriendRow> = user
        .friends
        .iter()
        .enumerate()
        .map(|(position, friend)| FriendRow {
            user_id,
            position: position as i32,
            friend_id: friend.0,
        })
        .collect();
    if !friend_rows.is_empty() {
        diesel::insert_into(user_friends::table)
            .values(&friend_rows)
            .execute(conn)?;
    }

    let thought_rows: Vec<ThoughtRow> = user
        .thoughts
        .iter()
        .enumerate()
        .map(|(position, thought)| ThoughtRow {
            user_id,
            position: position as i32,
            thought_id: thought.0,
        })
        .collect();
    if !thought_rows.is_empty() {
        diesel::insert_into(user_thoughts::table)
            .values(&thought_rows)
            .execute(conn)?;
    }

    Ok(())
}

/// Append `friend_id` after the current last position unless already listed.
fn add_friend_row(
    conn: &mut SqliteConnection,
    user_id: i32,
    friend_id: i32,
) -> QueryResult<bool> {
    let rows = user_friends::table.filter(user_friends::user_id.eq(user_id));
    let listed = rows.clone().filter(user_friends::friend_id.eq(friend_id));
    if diesel::select(exists(listed)).get_result::<bool>(conn)? {
        return Ok(false);
    }

    let last = rows
        .select(max(user_friends::position))
        .first::<Option<i32>>(conn)?;
    diesel::insert_into(user_friends::table)
        .values(FriendRow {
            user_id,
            position: last.map_or(0, |p| p + 1),
            friend_id,
        })
        .execute(conn)?;
    Ok(true)
}

fn add_thought_row(
    conn: &mut SqliteConnection,
    user_id: i32,
    thought_id: i32,
) -> QueryResult<bool> {
    let rows = user_thoughts::table.filter(user_thoughts::user_id.eq(user_id));
    let listed = rows.clone().filter(user_thoughts::thought_id.eq(thought_id));
    if diesel::select(exists(listed)).get_result::<bool>(conn)? {
        return Ok(false);
    }

    let last = rows
        .select(max(user_thoughts::position))
        .first::<Option<i32>>(conn)?;
    diesel::insert_into(user_thoughts::table)
        .values(ThoughtRow {
            user_id,
            position: last.map_or(0, |p| p + 1),
            thought_id,
        })
        .execute(conn)?;
    Ok(true)
}

fn apply_change(
    conn: &mut SqliteConnection,
    user_id: i32,
    change: RelationChange,
) -> QueryResult<bool> {
    match change {
        RelationChange::AddFriend(friend) => add_friend_row(conn, user_id, friend.0),
        RelationChange::RemoveFriend(friend) => {
            let removed = diesel::delete(
                user_friends::table
                    .filter(user_friends::user_id.eq(user_id))
                    .filter(user_friends::friend_id.eq(friend.0)),
            )
            .execute(conn)?;
            Ok(removed > 0)
        }
        RelationChange::AddThought(thought) => add_thought_row(conn, user_id, thought.0),
        RelationChange::RemoveThought(thought) => {
            let removed = diesel::delete(
                user_thoughts::table
                    .filter(user_thoughts::user_id.eq(user_id))
                    .filter(user_thoughts::thought_id.eq(thought.0)),
            )
            .execute(conn)?;
            Ok(removed > 0)
        }
    }
}

fn reload(conn: &mut SqliteConnection, user_id: i32) -> QueryResult<Option<User>> {
    let model = users::table
        .filter(users::id.eq(user_id))
        .select(UserModel::as_select())
        .first::<UserModel>(conn)
        .optional()?;
    load_one(conn, model)
}

fn repository_error(e: impl ToString) -> DomainError {
    DomainError::RepositoryError(e.to_string())
}

/// Turn a unique-index violation into `DuplicateKey`, naming the field from
/// SQLite's "UNIQUE constraint failed: users.<column>" message.
fn write_error(e: DieselError, username: &str, email: &str) -> DomainError {
    match e {
        DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, info) => {
            let message = info.message();
            if message.contains("users.username") {
                DomainError::DuplicateKey {
                    field: "username".to_string(),
                    value: username.to_string(),
                }
            } else if message.contains("users.email") {
                DomainError::DuplicateKey {
                    field: "email".to_string(),
                    value: email.to_string(),
                }
            } else {
                DomainError::RepositoryError(message.to_string())
            }
        }
        other => repository_error(other),
    }
}

pub struct SqliteUserRepository {
    pool: SqlitePool,
}

impl SqliteUserRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Run blocking diesel work on the blocking pool with a pooled connection.
    async fn run<T, F>(&self, work: F) -> Result<T, DomainError>
    where
        T: Send + 'static,
        F: FnOnce(&mut SqliteConnection) -> Result<T, DomainError> + Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool.get().map_err(repository_error)?;
            work(&mut *conn)
        })
        .await
        .map_err(repository_error)?
    }
}

#[async_trait]
impl UserRepository for SqliteUserRepository {
    async fn find_by_id(&self, id: UserId) -> Result<Option<User>, DomainError> {
        self.run(move |conn| {
            let model = users::table
                .filter(users::id.eq(id.0))
                .select(UserModel::as_select())
                .first::<UserModel>(conn)
                .optional()
                .map_err(repository_error)?;
            load_one(conn, model).map_err(repository_error)
        })
        .await
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<User>, DomainError> {
        let username = username.to_string();
        self.run(move |conn| {
            let model = users::table
                .filter(users::username.eq(username))
                .select(UserModel::as_select())
                .first::<UserModel>(conn)
                .optional()
                .map_err(repository_error)?;
            load_one(conn, model).map_err(repository_error)
        })
        .await
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, DomainError> {
        let email = email.to_string();
        self.run(move |conn| {
            let model = users::table
                .filter(users::email.eq(email))
                .select(UserModel::as_select())
                .first::<UserModel>(conn)
                .optional()
                .map_err(repository_error)?;
            load_one(conn, model).map_err(repository_error)
        })
        .await
    }

    async fn find_many(&self, ids: &[UserId]) -> Result<Vec<User>, DomainError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let ids: Vec<i32> = ids.iter().map(|id| id.0).collect();

        self.run(move |conn| {
            let models = users::table
                .filter(users::id.eq_any(ids.clone()))
                .select(UserModel::as_select())
                .load::<UserModel>(conn)
                .map_err(repository_error)?;
            let mut found: HashMap<i32, User> = hydrate(conn, models)
                .map_err(repository_error)?
                .into_iter()
                .filter_map(|user| user.id.map(|id| (id.0, user)))
                .collect();

            Ok(ids.iter().filter_map(|id| found.remove(id)).collect())
        })
        .await
    }

    async fn find_all(&self) -> Result<Vec<User>, DomainError> {
        self.run(|conn| {
            let models = users::table
                .order(users::id.asc())
                .select(UserModel::as_select())
                .load::<UserModel>(conn)
                .map_err(repository_error)?;
            hydrate(conn, models).map_err(repository_error)
        })
        .await
    }

    async fn insert(&self, user: &User) -> Result<User, DomainError> {
        let user = user.clone();

        let saved = self
            .run(move |conn| {
                conn.transaction::<_, DieselError, _>(|conn| {
                    diesel::insert_into(users::table)
                        .values(NewUserModel::from(&user))
                        .execute(conn)?;

                    // SQLite doesn't support RETURNING here, fetch by the unique username
                    let model = users::table
                        .filter(users::username.eq(&user.username))
                        .select(UserModel::as_select())
                        .first::<UserModel>(conn)?;

                    insert_relations(conn, model.id, &user)?;
                    Ok(load_one(conn, Some(model))?)
                })
                .map_err(|e| write_error(e, &user.username, &user.email))?
                .ok_or_else(|| repository_error("inserted user vanished"))
            })
            .await?;

        debug!(user_id = ?saved.id, "user row inserted");
        Ok(saved)
    }

    async fn update(&self, id: UserId, patch: &UserPatch) -> Result<User, DomainError> {
        let patch = patch.clone();

        self.run(move |conn| {
            let changeset = UserChangeset {
                username: patch.username.as_deref(),
                email: patch.email.as_deref(),
                password_hash: patch.password_hash.as_ref().map(|h| h.as_str()),
                updated_at: Utc::now().naive_utc(),
            };

            let updated = conn
                .immediate_transaction::<_, DieselError, _>(|conn| {
                    let rows = diesel::update(users::table.filter(users::id.eq(id.0)))
                        .set(&changeset)
                        .execute(conn)?;
                    if rows == 0 {
                        return Ok(None);
                    }
                    reload(conn, id.0)
                })
                .map_err(|e| {
                    write_error(
                        e,
                        patch.username.as_deref().unwrap_or_default(),
                        patch.email.as_deref().unwrap_or_default(),
                    )
                })?;

            updated.ok_or(DomainError::UserNotFound(id.0))
        })
        .await
    }

    async fn apply_relation(
        &self,
        id: UserId,
        change: RelationChange,
    ) -> Result<User, DomainError> {
        self.run(move |conn| {
            // Immediate: take the write lock before the existence reads
            let updated = conn
                .immediate_transaction::<_, DieselError, _>(|conn| {
                    let found = users::table
                        .filter(users::id.eq(id.0))
                        .select(users::id)
                        .first::<i32>(conn)
                        .optional()?;
                    if found.is_none() {
                        return Ok(None);
                    }

                    if apply_change(conn, id.0, change)? {
                        diesel::update(users::table.filter(users::id.eq(id.0)))
                            .set(users::updated_at.eq(Utc::now().naive_utc()))
                            .execute(conn)?;
                    }
                    reload(conn, id.0)
                })
                .map_err(repository_error)?;

            updated.ok_or(DomainError::UserNotFound(id.0))
        })
        .await
    }

    /// Relation rows owned by the user go with it (`ON DELETE CASCADE`);
    /// references to it held by other users stay.
    async fn delete(&self, id: UserId) -> Result<(), DomainError> {
        self.run(move |conn| {
            diesel::delete(users::table.filter(users::id.eq(id.0)))
                .execute(conn)
                .map(|_| ())
                .map_err(repository_error)
        })
        .await
    }
}
