use application::UserApp;
use domain::{NewUser, ThoughtId, UserChanges};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("🚀 User directory walkthrough (in-memory store)");

    let app = UserApp::in_memory(domain::DEFAULT_COST_FACTOR);

    let ada = app
        .register(NewUser::new("ada", "ada@example.com", "analytical"))
        .await?;
    let grace = app
        .register(NewUser::new("grace", "grace@example.com", "compiler"))
        .await?;
    println!("👤 Registered {} and {}", ada.username, grace.username);

    // Duplicate usernames are turned away with a field-specific message
    if let Err(e) = app
        .register(NewUser::new("ada", "someone@example.com", "analytical"))
        .await
    {
        println!("⛔ {}", e.user_message());
    }

    let ada_id = ada.id.ok_or("registered user has no id")?;
    let grace_id = grace.id.ok_or("registered user has no id")?;

    app.user_service.add_friend(ada_id, grace_id).await?;
    app.user_service.add_thought(ada_id, ThoughtId(1)).await?;

    app.user_service
        .update_user(ada_id, UserChanges::default().password("difference engine"))
        .await?;

    match app.login("ada@example.com", "analytical").await {
        Ok(_) => println!("❌ old password still works"),
        Err(e) => println!("🔒 old password rejected: {}", e.user_message()),
    }

    let profile = app.login("ada@example.com", "difference engine").await?;
    println!(
        "✅ Logged in as {} ({} friend(s), {} thought(s))",
        profile.username,
        profile.friend_count,
        profile.thoughts.len()
    );

    for friend in app.friends_of(ada_id).await? {
        println!("   • friend: {}", friend.username);
    }

    Ok(())
}
