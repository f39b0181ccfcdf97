//! TUI application state and main event loop

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use crossterm::event::{Event, EventStream, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use futures::{FutureExt, StreamExt};
use ratatui::DefaultTerminal;
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;

use super::ui;
use crate::api::SpotifyClient;
use crate::auth::{oauth, AuthState, TokenManager};
use crate::config::Config;
use crate::player::{Followup, PlayerController};

/// Local progress advances this often.
const PROGRESS_TICK: Duration = Duration::from_secs(1);

const SEEK_STEP_MS: i64 = 10_000;
const VOLUME_STEP: i16 = 10;

/// Which screen is showing
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum View {
    #[default]
    Auth,
    Player,
}

/// Events produced by spawned work and delivered back to the loop.
#[derive(Debug)]
pub enum AppEvent {
    Followup(Followup),
    LoginUrl(String),
    LoginFinished(std::result::Result<(), String>),
}

/// Application state
pub struct App {
    pub should_exit: bool,
    pub view: View,
    pub show_help: bool,
    pub player: PlayerController,
    /// Authorization URL of a login in progress
    pub login_url: Option<String>,
    pub login_in_progress: bool,
    /// Result or hint shown on the auth screen
    pub auth_message: Option<String>,
    tokens: Arc<TokenManager>,
    config: Config,
    events_tx: mpsc::UnboundedSender<AppEvent>,
}

impl App {
    pub fn new(
        client: SpotifyClient,
        config: Config,
        events_tx: mpsc::UnboundedSender<AppEvent>,
    ) -> Self {
        Self {
            should_exit: false,
            view: View::Auth,
            show_help: false,
            tokens: Arc::clone(client.tokens()),
            player: PlayerController::new(client),
            login_url: None,
            login_in_progress: false,
            auth_message: None,
            config,
            events_tx,
        }
    }

    /// React to a login/logout transition.
    pub async fn on_auth_state(&mut self, state: AuthState) {
        match state {
            AuthState::LoggedIn => {
                tracing::info!("Session active, loading player");
                self.view = View::Player;
                self.login_url = None;
                self.auth_message = None;
                self.player.init().await;
            }
            AuthState::LoggedOut => {
                tracing::info!("Session ended, showing login screen");
                self.view = View::Auth;
                self.show_help = false;
                self.player.reset();
            }
        }
    }

    pub async fn handle_key(&mut self, key: KeyEvent) {
        if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
            self.should_exit = true;
            return;
        }
        if self.show_help {
            self.show_help = false;
            return;
        }
        match self.view {
            View::Auth => self.handle_auth_key(key),
            View::Player => self.handle_player_key(key).await,
        }
    }

    fn handle_auth_key(&mut self, key: KeyEvent) {
        match key.code {
            KeyCode::Char('q') | KeyCode::Esc => self.should_exit = true,
            KeyCode::Char('l') | KeyCode::Enter if !self.login_in_progress => self.start_login(),
            _ => {}
        }
    }

    async fn handle_player_key(&mut self, key: KeyEvent) {
        let followup = match key.code {
            KeyCode::Char('r') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                self.player.poll().await;
                None
            }
            KeyCode::Char('q') | KeyCode::Esc => {
                self.should_exit = true;
                None
            }
            KeyCode::Char('?') => {
                self.show_help = true;
                None
            }
            KeyCode::Char(' ') => self.player.toggle_play_pause().await,
            KeyCode::Char('n') => self.player.next().await,
            KeyCode::Char('p') => self.player.previous().await,
            KeyCode::Right => self.player.seek_relative(SEEK_STEP_MS).await,
            KeyCode::Left => self.player.seek_relative(-SEEK_STEP_MS).await,
            KeyCode::Char('s') => {
                self.player.toggle_shuffle().await;
                None
            }
            KeyCode::Char('r') => {
                self.player.cycle_repeat().await;
                None
            }
            KeyCode::Char('+') | KeyCode::Char('=') => {
                self.player.change_volume(VOLUME_STEP).await;
                None
            }
            KeyCode::Char('-') => {
                self.player.change_volume(-VOLUME_STEP).await;
                None
            }
            KeyCode::Char('f') => self.player.toggle_like().await,
            KeyCode::Char('c') => self.player.activate_device().await,
            KeyCode::Char('L') => {
                self.tokens.logout().await;
                None
            }
            _ => None,
        };
        if let Some(followup) = followup {
            self.schedule(followup);
        }
    }

    /// Deliver `followup` back to the loop once its delay has passed.
    fn schedule(&self, followup: Followup) {
        let tx = self.events_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(followup.delay()).await;
            let _ = tx.send(AppEvent::Followup(followup));
        });
    }

    fn start_login(&mut self) {
        self.login_in_progress = true;
        self.auth_message = None;
        let tokens = Arc::clone(&self.tokens);
        let config = self.config.clone();
        let tx = self.events_tx.clone();

        tokio::spawn(async move {
            let url_tx = tx.clone();
            let result = oauth::authorize(&tokens, &config, move |url| {
                if !oauth::open_in_browser(url.as_str()) {
                    tracing::info!("Browser did not open, showing URL");
                }
                let _ = url_tx.send(AppEvent::LoginUrl(url.to_string()));
            })
            .await;
            let _ = tx.send(AppEvent::LoginFinished(result.map_err(|e| format!("{:#}", e))));
        });
    }

    pub async fn handle_event(&mut self, event: AppEvent) {
        match event {
            AppEvent::Followup(Followup::Poll { .. }) => self.player.poll().await,
            AppEvent::Followup(Followup::VerifyLike {
                track_id,
                previously_liked,
                ..
            }) => self.player.verify_like(&track_id, previously_liked).await,
            AppEvent::LoginUrl(url) => self.login_url = Some(url),
            AppEvent::LoginFinished(result) => {
                self.login_in_progress = false;
                if let Err(e) = result {
                    tracing::warn!("Login failed: {}", e);
                    self.login_url = None;
                    self.auth_message = Some(format!("Login failed: {}", e));
                }
            }
        }
    }

    /// Render the UI
    pub fn render(&self, frame: &mut ratatui::Frame) {
        ui::render(frame, self);
    }
}

/// Run the TUI application with panic-safe terminal restore
pub async fn run() -> Result<()> {
    let config = Config::load()?;
    let tokens = Arc::new(TokenManager::from_config(&config)?);
    let client = SpotifyClient::new(tokens, &config.api_base_url)?;

    let mut terminal = ratatui::init();
    let result = AssertUnwindSafe(run_app(&mut terminal, client, config))
        .catch_unwind()
        .await;
    ratatui::restore();

    match result {
        Ok(r) => r,
        Err(e) => std::panic::resume_unwind(e),
    }
}

async fn run_app(
    terminal: &mut DefaultTerminal,
    client: SpotifyClient,
    config: Config,
) -> Result<()> {
    let mut auth_rx: watch::Receiver<AuthState> = client.tokens().subscribe();
    let (events_tx, mut events_rx) = mpsc::unbounded_channel();
    let poll_every = Duration::from_secs(config.poll_interval_secs.max(1));
    let mut app = App::new(client, config, events_tx);

    let initial = *auth_rx.borrow_and_update();
    app.on_auth_state(initial).await;

    let mut term_events = EventStream::new();
    let mut poll = tokio::time::interval(poll_every);
    poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
    poll.tick().await;
    let mut progress = tokio::time::interval(PROGRESS_TICK);
    progress.set_missed_tick_behavior(MissedTickBehavior::Skip);

    while !app.should_exit {
        terminal.draw(|frame| app.render(frame))?;

        tokio::select! {
            event = term_events.next() => match event {
                Some(Ok(Event::Key(key))) if key.kind == KeyEventKind::Press => {
                    app.handle_key(key).await;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(e.into()),
                None => break,
            },
            _ = poll.tick() => {
                if app.view == View::Player {
                    app.player.poll().await;
                }
            }
            _ = progress.tick() => app.player.tick(),
            Some(event) = events_rx.recv() => app.handle_event(event).await,
            changed = auth_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = *auth_rx.borrow_and_update();
                app.on_auth_state(state).await;
            }
        }
    }

    Ok(())
}
