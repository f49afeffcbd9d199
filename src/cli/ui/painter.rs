use owo_colors::{OwoColorize, Style as OwoStyle};

use crate::session::{ConnectionState, DisconnectReason};

/// Applies colour to terminal text when colour output is enabled.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Painter {
    use_colour: bool,
}

impl Painter {
    pub(crate) fn new(use_colour: bool) -> Self {
        Self { use_colour }
    }

    pub(crate) fn heading<T: AsRef<str>>(&self, text: T) -> String {
        self.paint(text.as_ref(), OwoStyle::new().bold().cyan())
    }

    pub(crate) fn success<T: AsRef<str>>(&self, text: T) -> String {
        self.paint(text.as_ref(), OwoStyle::new().bold().green())
    }

    pub(crate) fn warning<T: AsRef<str>>(&self, text: T) -> String {
        self.paint(text.as_ref(), OwoStyle::new().bold().yellow())
    }

    pub(crate) fn failure<T: AsRef<str>>(&self, text: T) -> String {
        self.paint(text.as_ref(), OwoStyle::new().bold().red())
    }

    pub(crate) fn muted<T: AsRef<str>>(&self, text: T) -> String {
        self.paint(text.as_ref(), OwoStyle::new().dimmed())
    }

    pub(crate) fn value<T: AsRef<str>>(&self, text: T) -> String {
        self.paint(text.as_ref(), OwoStyle::new().bold())
    }

    /// Colours a connection state by how healthy it is.
    pub(crate) fn state(&self, state: ConnectionState) -> String {
        let text = state.to_string();
        match state {
            ConnectionState::Ready => self.success(text),
            ConnectionState::Disconnected {
                reason: DisconnectReason::NotSupported,
            } => self.failure(text),
            ConnectionState::Disconnected { .. } | ConnectionState::Disconnecting => {
                self.warning(text)
            }
            ConnectionState::Connecting | ConnectionState::Initializing => self.muted(text),
        }
    }

    /// Renders an on/off style flag.
    pub(crate) fn switch(&self, on: bool, on_text: &str, off_text: &str) -> String {
        if on {
            self.success(on_text)
        } else {
            self.muted(off_text)
        }
    }

    fn paint(&self, text: &str, style: OwoStyle) -> String {
        if self.use_colour {
            format!("{}", text.style(style))
        } else {
            text.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case::ready(ConnectionState::Ready)]
    #[case::connecting(ConnectionState::Connecting)]
    #[case::not_supported(ConnectionState::Disconnected { reason: DisconnectReason::NotSupported })]
    fn plain_state_is_the_display_text(#[case] state: ConnectionState) {
        assert_eq!(state.to_string(), Painter::new(false).state(state));
    }

    #[rstest]
    #[case::ready(ConnectionState::Ready)]
    #[case::disconnecting(ConnectionState::Disconnecting)]
    fn coloured_state_wraps_the_display_text(#[case] state: ConnectionState) {
        let styled = Painter::new(true).state(state);
        assert_ne!(state.to_string(), styled);
        assert!(styled.contains(&state.to_string()));
    }

    #[test]
    fn switch_picks_the_matching_label() {
        let painter = Painter::new(false);
        assert_eq!("pressed", painter.switch(true, "pressed", "released"));
        assert_eq!("released", painter.switch(false, "pressed", "released"));
    }
}
