/// Conversation view: the append-only chat log and its ratatui widget
use chrono::{DateTime, Utc};
use ratatui::buffer::Buffer;
use ratatui::layout::{Alignment, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Paragraph, Widget};
use serde::{Deserialize, Serialize};

/// Who an entry came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    /// Sent by the local user (relay echo)
    #[serde(rename = "self")]
    Local,
    Peer,
    Bot,
    System,
}

/// One rendered line of the chat log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationEntry {
    pub text: String,
    pub origin: Origin,
    pub received_at: DateTime<Utc>,
}

/// Ordered chat log. Entries are only ever appended.
#[derive(Debug, Clone, Default)]
pub struct ConversationView {
    entries: Vec<ConversationEntry>,
    /// Lines scrolled up from the bottom; 0 means following the latest entry
    scroll_offset: usize,
}

impl ConversationView {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry and scroll to show it
    pub fn append(&mut self, text: impl Into<String>, origin: Origin) {
        self.entries.push(ConversationEntry {
            text: text.into(),
            origin,
            received_at: Utc::now(),
        });
        self.scroll_to_bottom();
    }

    pub fn entries(&self) -> &[ConversationEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn last(&self) -> Option<&ConversationEntry> {
        self.entries.last()
    }

    pub fn scroll_offset(&self) -> usize {
        self.scroll_offset
    }

    pub fn scroll_to_bottom(&mut self) {
        self.scroll_offset = 0;
    }

    pub fn scroll_up(&mut self, lines: usize) {
        self.scroll_offset = (self.scroll_offset + lines).min(self.entries.len().saturating_sub(1));
    }

    pub fn scroll_down(&mut self, lines: usize) {
        self.scroll_offset = self.scroll_offset.saturating_sub(lines);
    }
}

fn origin_style(origin: Origin) -> Style {
    match origin {
        Origin::Local => Style::default().fg(Color::Cyan),
        Origin::Peer => Style::default().fg(Color::White),
        Origin::Bot => Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD),
        Origin::System => Style::default().fg(Color::DarkGray).add_modifier(Modifier::ITALIC),
    }
}

/// Widget rendering the tail of a [`ConversationView`]
pub struct ConversationPane<'a> {
    view: &'a ConversationView,
    title: &'a str,
}

impl<'a> ConversationPane<'a> {
    pub fn new(view: &'a ConversationView) -> Self {
        Self { view, title: " Chat " }
    }

    pub fn title(mut self, title: &'a str) -> Self {
        self.title = title;
        self
    }
}

impl Widget for ConversationPane<'_> {
    fn render(self, area: Rect, buf: &mut Buffer) {
        let block = Block::default()
            .borders(Borders::ALL)
            .title(self.title)
            .border_style(Style::default().fg(Color::Cyan));

        let visible = area.height.saturating_sub(2) as usize;
        let entries = self.view.entries();
        let end = entries.len().saturating_sub(self.view.scroll_offset());
        let start = end.saturating_sub(visible);

        let lines: Vec<Line> = entries[start..end]
            .iter()
            .map(|entry| {
                let stamp = Span::styled(
                    format!("{} ", entry.received_at.format("%H:%M")),
                    Style::default().fg(Color::DarkGray),
                );
                let text = Span::styled(entry.text.clone(), origin_style(entry.origin));
                let line = Line::from(vec![stamp, text]);
                if entry.origin == Origin::Local {
                    line.alignment(Alignment::Right)
                } else {
                    line
                }
            })
            .collect();

        Paragraph::new(lines).block(block).render(area, buf);
    }
}
