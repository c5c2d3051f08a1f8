/// CyberBull terminal chat client
/// Connect form, live conversation pane and moderation shortcuts
use std::time::Duration;

use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use cyberbull_core::protocol::Sensitivity;
use cyberbull_core::session::{ConnectionState, SendOutcome, SkipReason};
use cyberbull_core::view::ConversationPane;
use cyberbull_core::{ChatClient, ChatError, Config};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph},
    Frame, Terminal,
};
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::EnvFilter;

const LOG_FILE: &str = "cyberbull-tui.log";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Connect,
    Chat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Username,
    Peer,
    Sensitivity,
}

impl Field {
    fn next(self) -> Self {
        match self {
            Field::Username => Field::Peer,
            Field::Peer => Field::Sensitivity,
            Field::Sensitivity => Field::Username,
        }
    }
}

struct App {
    client: ChatClient,
    mode: Mode,
    focus: Field,
    username: String,
    peer: String,
    sensitivity: Sensitivity,
    input: String,
    /// One-line alert shown under the header
    alert: Option<String>,
    quit: bool,
}

impl App {
    fn new(client: ChatClient) -> Self {
        let sensitivity = client.config().sensitivity;
        Self {
            client,
            mode: Mode::Connect,
            focus: Field::Username,
            username: String::new(),
            peer: String::new(),
            sensitivity,
            input: String::new(),
            alert: None,
            quit: false,
        }
    }

    fn on_key(&mut self, key: KeyEvent) {
        if key.code == KeyCode::Esc
            || (key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL))
        {
            self.quit = true;
            return;
        }

        match self.mode {
            Mode::Connect => self.on_connect_key(key),
            Mode::Chat => self.on_chat_key(key),
        }
    }

    fn on_connect_key(&mut self, key: KeyEvent) {
        match (self.focus, key.code) {
            (_, KeyCode::Tab) | (_, KeyCode::Down) => self.focus = self.focus.next(),
            (_, KeyCode::Enter) => self.connect(),
            (Field::Sensitivity, KeyCode::Left | KeyCode::Right | KeyCode::Char(' ')) => {
                self.sensitivity = self.sensitivity.cycle();
            }
            (Field::Username, KeyCode::Char(c)) => self.username.push(c),
            (Field::Peer, KeyCode::Char(c)) => self.peer.push(c),
            (Field::Username, KeyCode::Backspace) => {
                self.username.pop();
            }
            (Field::Peer, KeyCode::Backspace) => {
                self.peer.pop();
            }
            _ => {}
        }
    }

    /// Validate and start opening the socket; the header tracks progress
    fn connect(&mut self) {
        match self
            .client
            .start_connect(&self.username, &self.peer, self.sensitivity)
        {
            Ok(_) => {
                self.alert = None;
                self.mode = Mode::Chat;
            }
            Err(ChatError::Validation(msg)) => self.alert = Some(msg),
            Err(e) => self.alert = Some(format!("Connection failed: {}", e)),
        }
    }

    fn on_chat_key(&mut self, key: KeyEvent) {
        let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
        match key.code {
            KeyCode::Char('b') if ctrl => {
                self.client.block();
            }
            KeyCode::Char('u') if ctrl => {
                self.client.unblock();
            }
            KeyCode::Char('r') if ctrl => {
                self.mode = Mode::Connect;
                self.focus = Field::Username;
            }
            KeyCode::Char(c) => self.input.push(c),
            KeyCode::Backspace => {
                self.input.pop();
            }
            KeyCode::PageUp => self.client.view_mut().scroll_up(5),
            KeyCode::PageDown => self.client.view_mut().scroll_down(5),
            KeyCode::Enter => match self.client.send(&self.input) {
                SendOutcome::Sent => {
                    self.input.clear();
                    self.alert = None;
                }
                SendOutcome::Skipped(SkipReason::EmptyMessage) => {}
                SendOutcome::Skipped(SkipReason::NoPeer) => {
                    self.alert = Some("Connect to a peer first".to_string());
                }
                SendOutcome::Dropped => {
                    self.alert = Some("Not connected - press Ctrl+R to reconnect".to_string());
                }
            },
            _ => {}
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Log to a file so output does not tear the alternate screen
    let log = std::fs::File::create(LOG_FILE)?;
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::sync::Mutex::new(log))
        .with_ansi(false)
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let (config, _) = Config::from_args(&args)?;
    info!("🚀 Starting CyberBull TUI against {}", config.server_url);
    let client = ChatClient::new(config)?;

    // Key reader
    let (key_tx, mut key_rx) = mpsc::unbounded_channel::<KeyEvent>();
    std::thread::spawn(move || loop {
        match event::poll(Duration::from_millis(250)) {
            Ok(true) => match event::read() {
                Ok(Event::Key(key)) if key.kind == KeyEventKind::Press => {
                    if key_tx.send(key).is_err() {
                        return;
                    }
                }
                Ok(_) => {}
                Err(_) => return,
            },
            Ok(false) => {
                if key_tx.is_closed() {
                    return;
                }
            }
            Err(_) => return,
        }
    });

    // TUI setup
    enable_raw_mode()?;
    let mut stdout = std::io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let mut app = App::new(client);
    let res = run_app(&mut terminal, &mut app, &mut key_rx).await;

    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;
    app.client.disconnect().await;

    if let Err(e) = res {
        eprintln!("TUI error: {e}");
    }
    Ok(())
}

async fn run_app<B: ratatui::backend::Backend>(
    terminal: &mut Terminal<B>,
    app: &mut App,
    key_rx: &mut mpsc::UnboundedReceiver<KeyEvent>,
) -> std::io::Result<()> {
    while !app.quit {
        terminal.draw(|f| draw(f, app))?;

        tokio::select! {
            Some(key) = key_rx.recv() => app.on_key(key),
            Some(event) = app.client.next_event() => app.client.handle(event),
        }
    }
    Ok(())
}

fn draw(f: &mut Frame, app: &App) {
    let bottom = if app.mode == Mode::Connect { 5 } else { 3 };
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(1),
            Constraint::Min(3),
            Constraint::Length(bottom),
            Constraint::Length(1),
        ])
        .split(f.size());

    draw_header(f, app, chunks[0]);
    f.render_widget(ConversationPane::new(app.client.view()), chunks[1]);
    match app.mode {
        Mode::Connect => draw_connect_form(f, app, chunks[2]),
        Mode::Chat => draw_input(f, app, chunks[2]),
    }

    let help = match app.mode {
        Mode::Connect => " Tab: next field | ←/→: sensitivity | Enter: connect | Esc: quit ",
        Mode::Chat => {
            " Enter: send | Ctrl+B: block | Ctrl+U: unblock | PgUp/PgDn: scroll | Ctrl+R: reconnect | Esc: quit "
        }
    };
    f.render_widget(
        Paragraph::new(help).style(Style::default().fg(Color::DarkGray)),
        chunks[3],
    );
}

fn draw_header(f: &mut Frame, app: &App, area: Rect) {
    let session = app.client.session();
    let (state, color) = match session.state() {
        ConnectionState::Connected => ("● connected", Color::Green),
        ConnectionState::Connecting => ("◌ connecting", Color::Yellow),
        ConnectionState::Closing => ("◌ closing", Color::Yellow),
        ConnectionState::Disconnected => ("○ disconnected", Color::Red),
    };

    let mut spans = vec![
        Span::styled(
            " CYBERBULL ",
            Style::default().fg(Color::Black).bg(Color::Cyan).add_modifier(Modifier::BOLD),
        ),
        Span::raw(" "),
        Span::styled(state, Style::default().fg(color)),
    ];
    if let Some(identity) = session.identity() {
        spans.push(Span::raw(format!(
            "  {} → {}",
            identity.local_user, identity.peer_user
        )));
    }
    if let Some(alert) = &app.alert {
        spans.push(Span::styled(
            format!("  ⚠ {}", alert),
            Style::default().fg(Color::LightRed).add_modifier(Modifier::BOLD),
        ));
    }
    f.render_widget(Paragraph::new(Line::from(spans)), area);
}

fn draw_connect_form(f: &mut Frame, app: &App, area: Rect) {
    let field = |label: &str, value: String, focused: bool| {
        let style = if focused {
            Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD)
        } else {
            Style::default().fg(Color::White)
        };
        Line::from(vec![
            Span::styled(format!("{:<12}", label), Style::default().fg(Color::Cyan)),
            Span::styled(value, style),
        ])
    };

    let lines = vec![
        field("Username", app.username.clone(), app.focus == Field::Username),
        field("Peer", app.peer.clone(), app.focus == Field::Peer),
        field(
            "Sensitivity",
            format!("< {} >", app.sensitivity),
            app.focus == Field::Sensitivity,
        ),
    ];
    let form = Paragraph::new(lines).block(
        Block::default()
            .title(" Connect ")
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::Cyan)),
    );
    f.render_widget(form, area);
}

fn draw_input(f: &mut Frame, app: &App, area: Rect) {
    let input = Paragraph::new(app.input.as_str()).block(
        Block::default()
            .title(" Message ")
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::Cyan)),
    );
    f.render_widget(input, area);
}
