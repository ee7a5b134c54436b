use std::env;
use std::sync::Arc;

use dotenvy::dotenv;
use serenity::{
    async_trait,
    client::{Client, EventHandler},
    framework::{
        standard::{
            macros::{command, group},
            Args, CommandError, CommandResult,
        },
        StandardFramework,
    },
    model::{channel::Message, gateway::Ready},
    prelude::GatewayIntents,
    Result as SerenityResult,
};
use serenity::client::Context;
use serenity::model::guild::Guild;
use serenity::model::prelude::VoiceState;
use songbird::{SerenityInit, Songbird};
use tracing::info;

use groove_bot::config::Config;
use groove_bot::models::{JoinTarget, ProviderId, RepeatMode, SessionKey};
use groove_bot::notify::NotificationBus;
use groove_bot::player::{Direction, Enqueued, PlaybackController, PlayOutcome};
use groove_bot::provider::ProviderRegistry;
use groove_bot::queue::QueueStore;
use groove_bot::session::SessionRegistry;
use groove_bot::store::MemoryListStore;

use crate::soundcloud::SoundcloudProvider;

mod discord;
mod gateway;
mod soundcloud;

struct Handler;

/// Everything the commands and event handlers share.
pub struct App {
    pub controller: Arc<PlaybackController>,
    pub registry: Arc<SessionRegistry>,
}

pub struct AppMap;

impl serenity::prelude::TypeMapKey for AppMap {
    type Value = Arc<App>;
}

pub struct BotDataMap;

pub struct BotData {
    pub id: u64,
}

impl serenity::prelude::TypeMapKey for BotDataMap {
    type Value = BotData;
}

#[async_trait]
impl EventHandler for Handler {
    async fn ready(&self, ctx: Context, ready: Ready) {
        info!("{} is connected!", ready.user.name);

        let bot_data = BotData { id: ready.user.id.0 };
        let data = &mut ctx.data.write().await;
        data.insert::<BotDataMap>(bot_data);
    }

    async fn voice_state_update(&self, ctx: Context, _: Option<VoiceState>, new: VoiceState) {
        let bot_id: Option<u64>;
        let app: Option<Arc<App>>;

        {
            let data = ctx.data.read().await;
            bot_id = data.get::<BotDataMap>().map(|data| data.id);
            app = data.get::<AppMap>().cloned();
        }

        let (Some(bot_id), Some(app), Some(guild_id)) = (bot_id, app, new.guild_id) else {
            return;
        };
        if bot_id != new.user_id.0 {
            return;
        }

        let key = SessionKey(guild_id.0);
        if new.channel_id.is_none() {
            info!("Voice transport for guild {key} dropped, starting grace window");
            app.registry.begin_disconnect_grace(key);
        } else {
            app.registry.note_reconnected(key).await;
        }
    }
}

#[group]
#[commands(
    play, playnow, pause, resume, next, prev, stop, queue, current, repeat, volume, remove, leave,
    help
)]
struct General;

#[tokio::main]
async fn main() {
    dotenv().ok();

    tracing_subscriber::fmt::init();

    // Configure the client with your Discord bot token in the environment.
    let token = env::var("DISCORD_TOKEN").expect("Expected a token in the environment");

    let config = Config::from_env();

    let manager = Songbird::serenity();

    let store = Arc::new(MemoryListStore::new());
    let queues = Arc::new(QueueStore::new(store, config.queue_max_len));
    let connector = Arc::new(discord::SongbirdConnector::new(manager.clone()));
    let registry = Arc::new(SessionRegistry::new(
        connector,
        queues.clone(),
        config.reconnect_grace,
        config.default_volume,
    ));
    let providers = Arc::new(ProviderRegistry::new().with(Arc::new(SoundcloudProvider::new())));
    let bus = Arc::new(NotificationBus::new());
    let controller = Arc::new(PlaybackController::new(
        registry.clone(),
        queues,
        providers,
        bus.clone(),
        config.idle_timeout,
    ));
    let app = Arc::new(App {
        controller,
        registry,
    });

    let framework = StandardFramework::new()
        .configure(|c| c.prefix("!"))
        .group(&GENERAL_GROUP);

    let intents = GatewayIntents::non_privileged() | GatewayIntents::MESSAGE_CONTENT;

    let mut client = Client::builder(&token, intents)
        .event_handler(Handler)
        .framework(framework)
        .register_songbird_with(manager.clone())
        .await
        .expect("Err creating client");

    {
        let mut w = client.data.write().await;
        w.insert::<AppMap>(app);
    }

    tokio::spawn(gateway::run(config.socket_bind, bus));

    tokio::spawn(async move {
        let _ = client
            .start()
            .await
            .map_err(|why| info!("Client ended: {why:?}"));
    });

    tokio::signal::ctrl_c()
        .await
        .expect("Control-C interruption failed!");

    info!("Received Ctrl-C, shutting down.");
}

#[command]
#[only_in(guilds)]
async fn play(ctx: &Context, msg: &Message, args: Args) -> CommandResult {
    play_inner(ctx, msg, args, false).await
}

#[command]
#[only_in(guilds)]
async fn playnow(ctx: &Context, msg: &Message, args: Args) -> CommandResult {
    play_inner(ctx, msg, args, true).await
}

async fn play_inner(ctx: &Context, msg: &Message, args: Args, force: bool) -> CommandResult {
    let app = get_app(ctx).await?;
    let guild = get_guild(ctx, msg)?;

    let user_channel = guild
        .voice_states
        .get(&msg.author.id)
        .and_then(|voice_state| voice_state.channel_id);
    let Some(channel) = user_channel else {
        check_msg(msg.reply(ctx, "Not in a voice channel").await);
        return Ok(());
    };

    let user_input = args.message().trim();
    if user_input.is_empty() {
        check_msg(
            msg.channel_id
                .say(&ctx.http, "Give me a SoundCloud link or something to search for")
                .await,
        );
        return Ok(());
    }

    info!("User input is {user_input}");

    let key = SessionKey(guild.id.0);
    let target = JoinTarget {
        guild_id: guild.id.0,
        channel_id: channel.0,
    };
    let (session, is_new) = app
        .registry
        .get_or_create(key, target, app.controller.clone())
        .await
        .map_err(|err| CommandError::from(err.to_string()))?;
    if !is_new && session.channel_id != channel.0 {
        check_msg(msg.reply(ctx, "You must be in the same channel as the bot").await);
        return Ok(());
    }

    match app
        .controller
        .enqueue(key, ProviderId::Soundcloud, user_input, force)
        .await
    {
        Ok(Enqueued::Rejected) => {
            check_msg(
                msg.channel_id
                    .say(&ctx.http, format!("Could not load a track for `{user_input}`"))
                    .await,
            );
        }
        Ok(Enqueued::Queued { track, started }) => {
            let reply = match started {
                Some(PlayOutcome::Playing(playing)) => {
                    format!("Playing song [{}]({})", playing.data.title, playing.data.permalink)
                }
                Some(_) => format!(
                    "Added **{}** to the queue, but its stream would not open",
                    track.data.title
                ),
                None => format!("Added **{}** to the queue", track.data.title),
            };
            check_msg(msg.channel_id.say(&ctx.http, reply).await);
        }
        Err(err) => {
            check_msg(msg.channel_id.say(&ctx.http, format!("Failed: {err}")).await);
        }
    }

    Ok(())
}

#[command]
#[only_in(guilds)]
async fn pause(ctx: &Context, msg: &Message) -> CommandResult {
    let app = get_app(ctx).await?;
    let Some(key) = member_session(ctx, msg, &app).await? else {
        return Ok(());
    };

    if let Err(err) = app.controller.pause(key).await {
        check_msg(msg.channel_id.say(&ctx.http, format!("o_O {err}")).await);
    }

    Ok(())
}

#[command]
#[only_in(guilds)]
async fn resume(ctx: &Context, msg: &Message) -> CommandResult {
    let app = get_app(ctx).await?;
    let Some(key) = member_session(ctx, msg, &app).await? else {
        return Ok(());
    };

    if let Err(err) = app.controller.resume(key).await {
        check_msg(msg.channel_id.say(&ctx.http, format!("o_O {err}")).await);
    }

    Ok(())
}

#[command]
#[only_in(guilds)]
async fn next(ctx: &Context, msg: &Message) -> CommandResult {
    advance_command(ctx, msg, Direction::Next).await
}

#[command]
#[only_in(guilds)]
async fn prev(ctx: &Context, msg: &Message) -> CommandResult {
    advance_command(ctx, msg, Direction::Prev).await
}

async fn advance_command(ctx: &Context, msg: &Message, direction: Direction) -> CommandResult {
    let app = get_app(ctx).await?;
    let Some(key) = member_session(ctx, msg, &app).await? else {
        return Ok(());
    };

    info!("ADVANCE - {direction:?} invoked from guild {key}!");

    match app.controller.advance(key, direction).await {
        Ok(PlayOutcome::Playing(track)) => {
            check_msg(
                msg.channel_id
                    .say(
                        &ctx.http,
                        format!("Playing song [{}]({})", track.data.title, track.data.permalink),
                    )
                    .await,
            );
        }
        Ok(PlayOutcome::QueueEnd) => {
            check_msg(msg.channel_id.say(&ctx.http, "The queue has ended").await);
        }
        Ok(PlayOutcome::NoTrack) => {
            check_msg(
                msg.channel_id
                    .say(&ctx.http, "That track is gone from the queue, check !queue")
                    .await,
            );
        }
        Ok(PlayOutcome::NoStream) => {
            check_msg(msg.channel_id.say(&ctx.http, "Stream not found").await);
        }
        Err(err) => {
            check_msg(msg.channel_id.say(&ctx.http, format!("Failed: {err}")).await);
        }
    }

    Ok(())
}

#[command]
#[only_in(guilds)]
async fn stop(ctx: &Context, msg: &Message) -> CommandResult {
    let app = get_app(ctx).await?;
    let Some(key) = member_session(ctx, msg, &app).await? else {
        return Ok(());
    };

    if let Err(err) = app.controller.stop(key).await {
        check_msg(msg.channel_id.say(&ctx.http, format!("o_O {err}")).await);
    }

    Ok(())
}

#[command]
#[only_in(guilds)]
async fn queue(ctx: &Context, msg: &Message) -> CommandResult {
    let app = get_app(ctx).await?;
    let Some(key) = member_session(ctx, msg, &app).await? else {
        return Ok(());
    };

    let tracks = app
        .controller
        .queue_view(key)
        .await
        .map_err(|err| CommandError::from(err.to_string()))?;

    if tracks.is_empty() {
        check_msg(msg.channel_id.say(&ctx.http, "The queue is empty!").await);
    } else {
        let max_tracks = 20;
        let mut titles: Vec<String> = Vec::with_capacity(tracks.len().min(max_tracks));

        for (index, track) in tracks.iter().take(max_tracks).enumerate() {
            let position = index + 1;
            titles.push(format!("{position} - {}", track.data.title));
        }

        let formatted = titles.join("\n");

        check_msg(
            msg.channel_id
                .say(&ctx.http, format!("**Queue**:\n```{formatted}```"))
                .await,
        );
    }

    Ok(())
}

#[command]
#[only_in(guilds)]
async fn current(ctx: &Context, msg: &Message) -> CommandResult {
    let app = get_app(ctx).await?;
    let Some(key) = member_session(ctx, msg, &app).await? else {
        return Ok(());
    };

    let (track, status) = app
        .controller
        .current(key)
        .await
        .map_err(|err| CommandError::from(err.to_string()))?;

    let reply = match track {
        Some(track) => {
            let label = if status.is_active() { "Playing" } else { "Paused on" };
            format!("{label} [{}]({})", track.data.title, track.data.permalink)
        }
        None => "Nothing is playing".to_string(),
    };
    check_msg(msg.channel_id.say(&ctx.http, reply).await);

    Ok(())
}

#[command]
#[only_in(guilds)]
async fn repeat(ctx: &Context, msg: &Message, mut args: Args) -> CommandResult {
    let app = get_app(ctx).await?;
    let Some(key) = member_session(ctx, msg, &app).await? else {
        return Ok(());
    };

    let mode = args
        .single::<String>()
        .ok()
        .as_deref()
        .and_then(RepeatMode::parse);
    let Some(mode) = mode else {
        check_msg(
            msg.channel_id
                .say(&ctx.http, "Repeat must be `off`, `track` or `queue`")
                .await,
        );
        return Ok(());
    };

    app.controller
        .set_repeat(key, mode)
        .await
        .map_err(|err| CommandError::from(err.to_string()))?;
    if let Err(why) = msg.react(&ctx.http, '\u{1F44D}').await {
        info!("Error adding reaction: {why:?}");
    }

    Ok(())
}

#[command]
#[only_in(guilds)]
async fn volume(ctx: &Context, msg: &Message, mut args: Args) -> CommandResult {
    let app = get_app(ctx).await?;
    let Some(key) = member_session(ctx, msg, &app).await? else {
        return Ok(());
    };

    let Ok(level) = args.single::<f32>() else {
        check_msg(
            msg.channel_id
                .say(&ctx.http, "Volume must be a number between 0.0 and 1.0")
                .await,
        );
        return Ok(());
    };

    if let Err(err) = app.controller.set_volume(key, level).await {
        check_msg(msg.channel_id.say(&ctx.http, format!("o_O {err}")).await);
    }

    Ok(())
}

#[command]
#[only_in(guilds)]
async fn remove(ctx: &Context, msg: &Message, mut args: Args) -> CommandResult {
    let app = get_app(ctx).await?;
    let Some(key) = member_session(ctx, msg, &app).await? else {
        return Ok(());
    };

    let Ok(position) = args.single::<usize>() else {
        check_msg(
            msg.channel_id
                .say(&ctx.http, "Invalid song index. Check the queue to list the songs.")
                .await,
        );
        return Ok(());
    };

    let track = match position.checked_sub(1) {
        Some(index) => app
            .controller
            .queues()
            .by_position(key, index)
            .await
            .map_err(|err| CommandError::from(err.to_string()))?,
        None => None,
    };
    let Some(track) = track else {
        check_msg(
            msg.channel_id
                .say(&ctx.http, "Invalid song index. Check the queue to list the songs.")
                .await,
        );
        return Ok(());
    };

    let removed = app
        .controller
        .remove_track(key, &track.queue_id)
        .await
        .map_err(|err| CommandError::from(err.to_string()))?;
    let reply = if removed {
        format!("Removed **{}** from the queue", track.data.title)
    } else {
        "That track was already gone".to_string()
    };
    check_msg(msg.channel_id.say(&ctx.http, reply).await);

    Ok(())
}

#[command]
#[only_in(guilds)]
async fn leave(ctx: &Context, msg: &Message) -> CommandResult {
    let app = get_app(ctx).await?;
    let guild_id = get_guild_id(ctx, msg)?;
    let key = SessionKey(guild_id.0);

    if app.registry.get(key).await.is_some() {
        app.registry.teardown(key).await;
        check_msg(msg.channel_id.say(&ctx.http, "Left voice channel").await);
    } else {
        check_msg(msg.reply(ctx, "Not in a voice channel").await);
    }

    Ok(())
}

#[command]
async fn help(ctx: &Context, msg: &Message) -> CommandResult {
    let message = r#"
**Commands:**
    **play [URL|Text]** - Adds a SoundCloud track to the queue (free text searches SoundCloud). Starts playing if nothing is.
    **playnow [URL|Text]** - Same, but plays the track immediately.
    **pause** / **resume** - Pause or resume the current track.
    **next** / **prev** - Jump to the next or previous track of the queue.
    **stop** - Stops playback for good (only while paused).
    **queue** - Shows the queue of tracks.
    **current** - Shows what is playing right now.
    **repeat [off|track|queue]** - Sets the repeat mode.
    **volume [0.0-1.0]** - Sets the player volume.
    **remove [INDEX]** - Removes the given queue entry.
    **leave** - Clears the queue and leaves the voice channel.
    "#;

    check_msg(msg.channel_id.say(&ctx.http, message).await);

    Ok(())
}

/// Resolves the caller's session and checks channel membership: the user
/// must sit in the same voice channel the session is bound to.
async fn member_session(
    ctx: &Context,
    msg: &Message,
    app: &Arc<App>,
) -> Result<Option<SessionKey>, CommandError> {
    let guild = get_guild(ctx, msg)?;
    let key = SessionKey(guild.id.0);

    let user_channel = guild
        .voice_states
        .get(&msg.author.id)
        .and_then(|voice_state| voice_state.channel_id);
    let Some(channel) = user_channel else {
        check_msg(msg.reply(ctx, "Not in a voice channel").await);
        return Ok(None);
    };

    let Some(session) = app.registry.get(key).await else {
        check_msg(msg.reply(ctx, "Player is not connected").await);
        return Ok(None);
    };
    if session.channel_id != channel.0 {
        check_msg(msg.reply(ctx, "You must be in the same channel as the bot").await);
        return Ok(None);
    }

    Ok(Some(key))
}

async fn get_app(ctx: &Context) -> Result<Arc<App>, CommandError> {
    let data = ctx.data.read().await;
    data.get::<AppMap>()
        .cloned()
        .ok_or_else(|| CommandError::from("App is not initialised"))
}

/// Checks that a message successfully sent; if not, then logs why to stdout.
fn check_msg(result: SerenityResult<Message>) {
    if let Err(why) = result {
        info!("Error sending message: {why:?}");
    }
}

fn get_guild(ctx: &Context, msg: &Message) -> Result<Guild, CommandError> {
    msg.guild(&ctx.cache)
        .ok_or_else(|| CommandError::from("Guild not found"))
}

fn get_guild_id(
    ctx: &Context,
    msg: &Message,
) -> Result<serenity::model::id::GuildId, CommandError> {
    let guild_id = get_guild(ctx, msg)?.id;

    Ok(guild_id)
}
