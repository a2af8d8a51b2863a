//! Demo login shell served over TELNET.

use crate::codec::{OPT_ECHO, Verb};
use crate::config::{SessionConfig, ShellConfig};
use crate::error::TelnetResult;
use crate::server::Handler;
use crate::session::Session;
use async_trait::async_trait;
use regex::Regex;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Auth {
    pub username: String,
    pub password: String,
    pub max_attempts: u32,
    pub retry_delay: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Reply {
    Exit(String),
    Text(String),
}

/// Prompt loop answering each line with the first matching regex command.
#[derive(Debug, Clone)]
pub struct Shell {
    prompt: String,
    welcome: String,
    exit_command: String,
    exit_message: String,
    command_not_found: String,
    commands: Vec<(Regex, String)>,
    auth: Option<Auth>,
    request_window_size: bool,
}

impl Shell {
    /// Compiles the command patterns; an invalid pattern is an error here
    /// rather than on first use.
    pub fn from_config(shell: &ShellConfig, session: &SessionConfig) -> TelnetResult<Self> {
        let commands = shell
            .commands
            .iter()
            .map(|command| -> TelnetResult<(Regex, String)> {
                Ok((Regex::new(&command.regex)?, command.response.clone()))
            })
            .collect::<TelnetResult<Vec<_>>>()?;
        let auth = shell.auth.as_ref().map(|auth| Auth {
            username: auth.username.clone(),
            password: auth.password.clone(),
            max_attempts: auth.max_attempts,
            retry_delay: Duration::from_millis(auth.retry_delay_ms),
        });

        Ok(Self {
            prompt: shell.prompt.clone(),
            welcome: shell.welcome.clone(),
            exit_command: shell.exit_command.clone(),
            exit_message: shell.exit_message.clone(),
            command_not_found: shell.command_not_found.clone(),
            commands,
            auth,
            request_window_size: session.request_window_size,
        })
    }

    async fn run(&self, session: &mut Session) -> TelnetResult<()> {
        if self.request_window_size
            && let Some(size) = session.request_window_size().await?
        {
            tracing::debug!(peer = %session.peer(), cols = size.cols, rows = size.rows, "Shell window size");
        }

        if let Some(auth) = &self.auth
            && !authenticate(auth, session).await?
        {
            tracing::info!(peer = %session.peer(), "Login failed");
            return Ok(());
        }

        session.write_line(&[self.welcome.as_str()]).await?;
        loop {
            session.write_line(&[self.prompt.as_str()]).await?;
            let line = session.read_line().await?;
            let line = line.trim_end_matches(['\r', '\n']);
            if line.is_empty() {
                continue;
            }
            match self.respond(line) {
                Reply::Exit(message) => {
                    session.write_line(&[message.as_str()]).await?;
                    return Ok(());
                }
                Reply::Text(text) => {
                    session.write_line(&[text.as_str()]).await?;
                }
            }
        }
    }

    fn respond(&self, line: &str) -> Reply {
        let name = line.split(' ').next().unwrap_or_default();
        if name == self.exit_command {
            return Reply::Exit(self.exit_message.clone());
        }
        match self.commands.iter().find(|(regex, _)| regex.is_match(line)) {
            Some((_, response)) => Reply::Text(response.clone()),
            None => Reply::Text(format!("{name}{}", self.command_not_found)),
        }
    }
}

#[async_trait]
impl Handler for Shell {
    async fn serve(&self, mut session: Session) {
        if let Err(err) = self.run(&mut session).await {
            tracing::debug!(peer = %session.peer(), error = %err, "Shell session ended");
        }
    }
}

/// Prompts for credentials up to `max_attempts` times. The client is asked to
/// stop echoing while the password is typed.
async fn authenticate(auth: &Auth, session: &mut Session) -> TelnetResult<bool> {
    for _ in 0..auth.max_attempts {
        session.write_line(&["Login: "]).await?;
        let username = session.read_line().await?;

        session.write_line(&["Password: "]).await?;
        session.write_command(Verb::Will, OPT_ECHO).await?;
        let password = session.read_line().await?;
        session.write_command(Verb::Wont, OPT_ECHO).await?;
        session.write_line(&["\n"]).await?;

        if username == auth.username && password == auth.password {
            return Ok(true);
        }

        tokio::time::sleep(auth.retry_delay).await;
        session.write_line(&["\nLogin incorrect\n"]).await?;
    }

    let exceeded = format!("Maximum number of tries exceeded ({})\n", auth.max_attempts);
    session.write_line(&[exceeded.as_str()]).await?;
    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AuthConfig, CommandConfig};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio_util::sync::CancellationToken;

    fn quiet_session_config() -> SessionConfig {
        SessionConfig {
            request_window_size: false,
            ..SessionConfig::default()
        }
    }

    async fn converse(shell: Shell, input: &[u8]) -> String {
        let (mut client, server) = tokio::io::duplex(8192);
        let session = Session::new(Box::new(server), "shell-peer", CancellationToken::new())
            .with_line_discipline(true);
        client.write_all(input).await.unwrap();
        client.shutdown().await.unwrap();
        shell.serve(session).await;

        let mut output = Vec::new();
        client.read_to_end(&mut output).await.unwrap();
        String::from_utf8_lossy(&output).into_owned()
    }

    #[test]
    fn respond_matches_commands_in_order() {
        let shell = Shell::from_config(&ShellConfig::default(), &quiet_session_config()).unwrap();
        assert_eq!(
            shell.respond("uname -a"),
            Reply::Text("telnetd\n".to_string())
        );
        assert_eq!(
            shell.respond("ls -la"),
            Reply::Text("ls: command not found\n".to_string())
        );
        assert_eq!(
            shell.respond("exit now"),
            Reply::Exit("Goodbye!\r\n".to_string())
        );
    }

    #[test]
    fn invalid_pattern_is_rejected() {
        let config = ShellConfig {
            commands: vec![CommandConfig {
                regex: "(".to_string(),
                response: String::new(),
            }],
            ..ShellConfig::default()
        };
        assert!(Shell::from_config(&config, &quiet_session_config()).is_err());
    }

    #[tokio::test]
    async fn shell_session_runs_until_exit() {
        let shell = Shell::from_config(&ShellConfig::default(), &quiet_session_config()).unwrap();
        let output = converse(shell, b"help\r\n\r\nfoo bar\r\nexit\r\n").await;
        assert!(output.starts_with("\r\nWelcome!\r\n$ "));
        assert!(output.contains("Available commands: help, uname, exit\r\n"));
        assert!(output.contains("foo: command not found\r\n"));
        assert!(output.ends_with("Goodbye!\r\n"));
    }

    #[tokio::test]
    async fn login_succeeds_with_valid_credentials() {
        let config = ShellConfig {
            auth: Some(AuthConfig {
                username: "admin".to_string(),
                password: "secret".to_string(),
                max_attempts: 3,
                retry_delay_ms: 0,
            }),
            ..ShellConfig::default()
        };
        let shell = Shell::from_config(&config, &quiet_session_config()).unwrap();
        let output = converse(shell, b"admin\r\nsecret\r\nexit\r\n").await;
        assert!(output.starts_with("Login: Password: \u{fffd}"));
        assert!(output.contains("Welcome!"));
        assert!(!output.contains("Login incorrect"));
    }

    #[tokio::test]
    async fn login_gives_up_after_max_attempts() {
        let config = ShellConfig {
            auth: Some(AuthConfig {
                username: "admin".to_string(),
                password: "secret".to_string(),
                max_attempts: 2,
                retry_delay_ms: 0,
            }),
            ..ShellConfig::default()
        };
        let shell = Shell::from_config(&config, &quiet_session_config()).unwrap();
        let output = converse(shell, b"root\r\nroot\r\nadmin\r\nwrong\r\n").await;
        assert_eq!(output.matches("Login incorrect").count(), 2);
        assert!(output.contains("Maximum number of tries exceeded (2)"));
        assert!(!output.contains("Welcome!"));
    }
}
