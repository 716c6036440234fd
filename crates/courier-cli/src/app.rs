//! Composition root: wires configuration, credential storage, the authority
//! and the realtime transport into one `SessionManager`, and implements the
//! CLI commands on top of it.

use std::io::{self, Write};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use chrono::Local;
use tokio::sync::broadcast;
use tracing::{error, warn};

use courier_core::{
    Config, ConnectionState, CredentialBackend, CredentialStore, FileCredentialStore,
    HttpAuthority, KeyringCredentialStore, MemoryCredentialStore, Session, SessionManager,
    SessionState, WsTransport,
};

/// How often `watch` checks whether the session was ended underneath it
const SESSION_POLL_INTERVAL: Duration = Duration::from_secs(1);

pub struct App {
    config: Config,
    manager: SessionManager,
    transport: Arc<WsTransport>,
}

impl App {
    pub fn new(config: Config) -> Result<Self> {
        let store: Arc<dyn CredentialStore> = match config.credential_backend {
            CredentialBackend::File => Arc::new(FileCredentialStore::new(config.cache_dir()?)),
            CredentialBackend::Keyring => {
                Arc::new(KeyringCredentialStore::new(config.profile.clone()))
            }
            CredentialBackend::Memory => Arc::new(MemoryCredentialStore::new()),
        };

        let authority = Arc::new(HttpAuthority::with_timeout(
            config.api_base_url.clone(),
            config.request_timeout(),
        )?);
        let transport = Arc::new(WsTransport::new(
            config.realtime_url.clone(),
            Arc::clone(&store),
        ));
        let manager = SessionManager::new(
            config.session_config(),
            store,
            authority,
            transport.clone(),
        );

        Ok(Self {
            config,
            manager,
            transport,
        })
    }

    // =========================================================================
    // Commands
    // =========================================================================

    pub async fn login(&mut self, identifier: Option<&str>) -> Result<()> {
        let identifier = match identifier {
            Some(id) => id.trim().to_string(),
            None => Self::prompt_identifier(self.config.last_identifier.as_deref())?,
        };
        if identifier.is_empty() {
            bail!("Identifier required");
        }
        let password = rpassword::prompt_password("Password: ")?;

        println!("\nAuthenticating...");
        match self.manager.login(&identifier, &password).await {
            Ok(session) => {
                self.config.last_identifier = Some(identifier);
                if let Err(e) = self.config.save() {
                    warn!(error = %e, "Failed to save config");
                }
                println!("Login successful!\n");
                Self::print_session(&session);
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "Login failed");
                Err(anyhow!(e.user_message()))
            }
        }
    }

    pub async fn status(&self) -> Result<()> {
        if self.manager.restore_on_startup().is_none() {
            println!("Not logged in.");
            return Ok(());
        }

        self.wait_for_connection().await;
        if let Some(session) = self.manager.session() {
            Self::print_session(&session);
        }
        Ok(())
    }

    pub fn logout(&self) -> Result<()> {
        self.manager.logout()?;
        println!("Logged out.");
        Ok(())
    }

    pub async fn watch(&self) -> Result<()> {
        let Some(session) = self.manager.restore_on_startup() else {
            println!("Not logged in. Run `courier login` first.");
            return Ok(());
        };

        println!(
            "Watching as {} ({}). Press Ctrl-C to stop.",
            session.subject,
            session.role.display_name()
        );

        let mut notifications = self.transport.subscribe();
        let mut connection = self.manager.subscribe_connection();
        let mut ticker = tokio::time::interval(SESSION_POLL_INTERVAL);
        let mut dropped = false;
        let ctrl_c = tokio::signal::ctrl_c();
        tokio::pin!(ctrl_c);

        loop {
            tokio::select! {
                _ = &mut ctrl_c => {
                    println!("\nStopping.");
                    break;
                }
                received = notifications.recv() => match received {
                    Ok(notification) => {
                        println!(
                            "[{}] {}: {}",
                            Local::now().format("%H:%M:%S"),
                            notification.event,
                            notification.payload
                        );
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Fell behind on notifications");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                changed = connection.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let state = *connection.borrow_and_update();
                    println!("Realtime channel {}", state.display_name());
                }
                _ = ticker.tick() => {
                    if self.manager.state() == SessionState::LoggedOut {
                        return match self.manager.last_end() {
                            Some(end) if end.was_forced() => Err(anyhow!(end.user_message())),
                            _ => {
                                println!("Session ended.");
                                Ok(())
                            }
                        };
                    }
                    let open = self.transport.is_open();
                    if self.manager.connection_state() == ConnectionState::Connected
                        && !open
                        && !dropped
                    {
                        warn!("Realtime channel dropped by server");
                        println!("Realtime channel lost; no further notifications will arrive.");
                    }
                    dropped = !open;
                }
            }
        }
        Ok(())
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    async fn wait_for_connection(&self) {
        let mut connection = self.manager.subscribe_connection();
        let limit = self.config.session_config().handshake_timeout + Duration::from_secs(1);
        let settled = tokio::time::timeout(
            limit,
            connection.wait_for(|state| *state != ConnectionState::Connecting),
        )
        .await;
        if settled.is_err() {
            warn!("Realtime connection did not settle");
        }
    }

    fn prompt_identifier(last: Option<&str>) -> Result<String> {
        match last {
            Some(last) => print!("Identifier [{}]: ", last),
            None => print!("Identifier: "),
        }
        io::stdout().flush()?;

        let mut input = String::new();
        io::stdin().read_line(&mut input)?;
        let input = input.trim();

        Ok(match (input.is_empty(), last) {
            (true, Some(last)) => last.to_string(),
            _ => input.to_string(),
        })
    }

    fn print_session(session: &Session) {
        println!("  Subject:    {}", session.subject);
        println!("  Role:       {}", session.role.display_name());
        println!(
            "  Expires:    {} ({} min left)",
            session.expires_at.with_timezone(&Local).format("%Y-%m-%d %H:%M"),
            session.minutes_until_expiry()
        );
        println!("  Realtime:   {}", session.connection.display_name());
    }
}
