//! Text protocol for hosts that push events over a pipe, one command per line:
//!
//! ```text
//! open /path/to/scene.blend   load a subject (no path: unidentified document)
//! save                        checkpoint
//! close                       unload
//! focus | blur                window focus changes
//! move <x> <y>                pointer position
//! press                       key or button press
//! bound <n>                   history bound
//! clear                       clear the subject's history
//! ```
//!
//! Empty lines and lines starting with `#` are ignored.

use anyhow::{anyhow, bail, Context, Result};
use tokio::{
    io::{AsyncBufRead, AsyncBufReadExt},
    sync::mpsc,
};
use tracing::{debug, warn};

use crate::tracker::{runner::LifecycleEvent, storage::SubjectKey};

use super::{FeedHandle, InputEvent};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostCommand {
    Input(InputEvent),
    Focus(bool),
    Lifecycle(LifecycleEvent),
}

pub fn parse_line(line: &str) -> Result<Option<HostCommand>> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }
    let (command, rest) = line
        .split_once(char::is_whitespace)
        .map(|(c, r)| (c, r.trim()))
        .unwrap_or((line, ""));

    let parsed = match command {
        "open" => HostCommand::Lifecycle(LifecycleEvent::Load(SubjectKey::from_path(rest))),
        "save" => HostCommand::Lifecycle(LifecycleEvent::Checkpoint),
        "close" => HostCommand::Lifecycle(LifecycleEvent::Unload),
        "clear" => HostCommand::Lifecycle(LifecycleEvent::Clear),
        "bound" => HostCommand::Lifecycle(LifecycleEvent::SetBound(
            rest.parse::<i64>()
                .with_context(|| format!("Invalid bound {rest:?}"))?,
        )),
        "focus" => HostCommand::Focus(true),
        "blur" => HostCommand::Focus(false),
        "press" => HostCommand::Input(InputEvent::Pressed),
        "move" => {
            let mut coordinates = rest.split_whitespace().map(str::parse::<i32>);
            match (coordinates.next(), coordinates.next(), coordinates.next()) {
                (Some(Ok(x)), Some(Ok(y)), None) => {
                    HostCommand::Input(InputEvent::PointerMoved { x, y })
                }
                _ => bail!("Expected `move <x> <y>`, got {line:?}"),
            }
        }
        other => return Err(anyhow!("Unknown command {other:?}")),
    };
    Ok(Some(parsed))
}

/// Reads commands until end of input. Input and focus go to the feed, lifecycle events to the
/// tracking loop, with a mark left in the feed so input keeps its place relative to them. Focus
/// is state and takes effect immediately. Malformed lines are logged and skipped. Returning drops `events`, which ends the
/// tracking loop once it has drained the channel.
pub async fn feed_host_lines(
    reader: impl AsyncBufRead + Unpin,
    feed: FeedHandle,
    events: mpsc::Sender<LifecycleEvent>,
) -> Result<()> {
    let mut lines = reader.lines();
    while let Some(line) = lines.next_line().await? {
        let command = match parse_line(&line) {
            Ok(Some(v)) => v,
            Ok(None) => continue,
            Err(e) => {
                warn!("Skipping host line {line:?}: {e}");
                continue;
            }
        };
        debug!("Host command {command:?}");
        match command {
            HostCommand::Input(event) => feed.push(event)?,
            HostCommand::Focus(focused) => feed.set_focused(focused)?,
            HostCommand::Lifecycle(event) => {
                feed.mark_lifecycle()?;
                events
                    .send(event)
                    .await
                    .map_err(|_| anyhow!("Tracking loop stopped before the host"))?
            }
        }
    }
    debug!("Host input ended");
    Ok(())
}

#[cfg(test)]
mod tests {
    use anyhow::Result;
    use tokio::sync::mpsc;

    use crate::{
        host_api::{ActivityOracle, HostFeed, InputEvent},
        tracker::{runner::LifecycleEvent, storage::SubjectKey},
    };

    use super::{feed_host_lines, parse_line, HostCommand};

    #[test]
    fn test_parse_commands() -> Result<()> {
        assert_eq!(
            parse_line("open /home/me/My Scene.blend")?,
            Some(HostCommand::Lifecycle(LifecycleEvent::Load(
                SubjectKey::from_path("/home/me/My Scene.blend")
            )))
        );
        assert_eq!(
            parse_line("open")?,
            Some(HostCommand::Lifecycle(LifecycleEvent::Load(
                SubjectKey::Unidentified
            )))
        );
        assert_eq!(
            parse_line("  move 10 -3 ")?,
            Some(HostCommand::Input(InputEvent::PointerMoved { x: 10, y: -3 }))
        );
        assert_eq!(
            parse_line("bound 7")?,
            Some(HostCommand::Lifecycle(LifecycleEvent::SetBound(7)))
        );
        assert_eq!(parse_line("blur")?, Some(HostCommand::Focus(false)));
        assert_eq!(parse_line("# comment")?, None);
        assert_eq!(parse_line("")?, None);
        Ok(())
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(parse_line("move 1").is_err());
        assert!(parse_line("move 1 2 3").is_err());
        assert!(parse_line("bound many").is_err());
        assert!(parse_line("dance").is_err());
    }

    #[tokio::test]
    async fn test_feed_dispatches_lines() -> Result<()> {
        let input = "open /a.blend\nmove 1 1\nnonsense\npress\nblur\nsave\n";
        let (mut feed, handle) = HostFeed::new();
        let (sender, mut receiver) = mpsc::channel(10);

        feed_host_lines(input.as_bytes(), handle, sender).await?;

        assert_eq!(
            receiver.recv().await,
            Some(LifecycleEvent::Load(SubjectKey::from_path("/a.blend")))
        );
        assert_eq!(receiver.recv().await, Some(LifecycleEvent::Checkpoint));
        assert_eq!(receiver.recv().await, None);
        assert!(!feed.is_focused()?);
        assert!(feed.drain_input()?.is_empty());
        feed.lifecycle_applied()?;
        assert_eq!(
            feed.drain_input()?,
            vec![InputEvent::PointerMoved { x: 1, y: 1 }, InputEvent::Pressed]
        );
        assert!(feed.drain_input()?.is_empty());
        feed.lifecycle_applied()?;
        assert!(feed.drain_input()?.is_empty());
        Ok(())
    }
}
