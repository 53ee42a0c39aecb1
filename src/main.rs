mod handbook;
mod html;
mod interpret;
mod nav;
mod render;
mod serve;
mod source;
mod state;
mod web_assets;

use std::{
    fs, io,
    path::{Path, PathBuf},
    process,
    sync::mpsc::{self, Receiver, Sender},
    thread,
    time::Duration,
};

use clap::{Parser, Subcommand};
use crossterm::event::{self, Event, KeyCode, KeyEventKind, KeyModifiers};
use ratatui::{
    layout::{Constraint, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Clear, Paragraph},
    DefaultTerminal, Frame,
};

use handbook::Prefs;
use nav::Manifest;
use source::{fetch_first, BookStore};
use state::{active_view, HandbookSlot, LoadOutcome, SectionSlot, SlotStatus, ViewRange};

/// Width of the contents sidebar in the terminal layout.
const SIDEBAR_WIDTH: u16 = 24;

/// Explicit subcommands.
#[derive(Subcommand)]
enum Commands {
    /// Browse a book directory in TUI mode (equivalent to legacy positional form)
    View {
        /// Book directory to browse
        book_dir: String,
        /// Jump to this section on startup
        #[arg(long)]
        target: Option<String>,
    },
    /// Serve a book directory over HTTP
    Serve {
        /// Book directory to serve
        book_dir: String,
        /// Address to listen on
        #[arg(long, default_value = "127.0.0.1")]
        bind: String,
        /// First port to try; taken ports are walked past
        #[arg(long, default_value = "3333")]
        port: u16,
    },
}

/// Full CLI with explicit subcommands.
#[derive(Parser)]
#[command(
    name = "lorebook",
    version,
    about = "A TUI and web viewer for worldbook content directories",
    after_help = "INVOCATION FORMS:\n  lorebook <dir>                   Browse a book directory in TUI mode (legacy)\n  lorebook view <dir>              Browse a book directory in TUI mode\n  lorebook serve [OPTIONS] <dir>   Serve a book directory over HTTP"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Legacy positional form: lorebook <dir>
#[derive(Parser)]
#[command(
    name = "lorebook",
    version,
    about = "A TUI and web viewer for worldbook content directories"
)]
struct LegacyCli {
    /// Path to a book directory to browse
    book_dir: String,
}

/// Resolved dispatch mode after CLI argument parsing.
enum DispatchMode {
    Legacy {
        book_dir: String,
    },
    View {
        book_dir: String,
        target: Option<String>,
    },
    Serve {
        book_dir: String,
        bind: String,
        port: u16,
    },
}

fn resolve_dispatch_mode() -> DispatchMode {
    use clap::error::ErrorKind;

    match Cli::try_parse() {
        Ok(cli) => match cli.command {
            Commands::View { book_dir, target } => DispatchMode::View { book_dir, target },
            Commands::Serve { book_dir, bind, port } => {
                DispatchMode::Serve { book_dir, bind, port }
            }
        },
        Err(clap_err) => {
            // --help/--version output comes from the subcommand-aware parser.
            if let ErrorKind::DisplayHelp | ErrorKind::DisplayVersion = clap_err.kind() {
                clap_err.exit();
            }
            // Anything else gets one more chance as the legacy positional form.
            match LegacyCli::try_parse() {
                Ok(legacy) => DispatchMode::Legacy {
                    book_dir: legacy.book_dir,
                },
                Err(legacy_err) => legacy_err.exit(),
            }
        }
    }
}

fn main() -> io::Result<()> {
    match resolve_dispatch_mode() {
        DispatchMode::Legacy { book_dir } => {
            eprintln!("[legacy] TUI browser dispatched for: {book_dir}");
            run_tui_book(&book_dir, None)
        }
        DispatchMode::View { book_dir, target } => {
            eprintln!("[view] TUI browser dispatched for: {book_dir}");
            run_tui_book(&book_dir, target)
        }
        DispatchMode::Serve {
            book_dir,
            bind,
            port,
        } => {
            let rt = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .map_err(io::Error::other)?;
            rt.block_on(serve::run_serve(book_dir, bind, port))
        }
    }
}

fn run_tui_book(dir_arg: &str, target: Option<String>) -> io::Result<()> {
    let root = Path::new(dir_arg);

    if !root.is_dir() {
        eprintln!("Error: '{dir_arg}' is not a directory.");
        eprintln!("Expected a book directory containing toc.json and data/.");
        process::exit(1);
    }

    if let Some(ref t) = target {
        if !nav::is_valid_target(t) {
            eprintln!("Error: '{t}' is not a valid section target.");
            eprintln!("Targets are lowercase slugs such as 'qi' or 'world-history'.");
            process::exit(1);
        }
    }

    let canonical = fs::canonicalize(root).unwrap_or_else(|_| root.to_path_buf());
    let manifest = Manifest::load(&canonical).unwrap_or_else(|e| {
        match e.kind() {
            io::ErrorKind::NotFound => {
                eprintln!("Error: no toc.json found in '{dir_arg}'.");
            }
            io::ErrorKind::InvalidData => {
                eprintln!("Error: {e}");
            }
            _ => {
                eprintln!("Error reading toc.json from '{dir_arg}': {e}");
            }
        }
        process::exit(1);
    });

    let prefs_path = Prefs::default_path();
    let prefs = Prefs::load_from(prefs_path.as_deref());

    let mut app = App::new(canonical, manifest, prefs, prefs_path);
    if let Some(t) = target {
        app.goto(&t);
    }

    ratatui::run(|terminal| run(terminal, &mut app))
}

/// One selectable row in the contents sidebar. The set of rows depends on
/// which groups are folded, so it is recomputed from state on demand.
#[derive(Clone, Debug, PartialEq)]
enum NavEntry {
    View(&'static str),
    Group(usize),
    Section { group: usize, index: usize },
}

struct App {
    store: BookStore,
    manifest: Manifest,
    /// The single reusable reader container.
    reader: SectionSlot,
    handbook: HandbookSlot,
    prefs: Prefs,
    prefs_path: Option<PathBuf>,
    tx: Sender<LoadOutcome>,
    rx: Receiver<LoadOutcome>,
    /// Composed content column and the line range each view occupies in it.
    lines: Vec<Line<'static>>,
    ranges: Vec<ViewRange>,
    scroll: usize,
    /// Index into `nav_entries()` of the selected sidebar row.
    selected: usize,
    /// Fold state per manifest group.
    collapsed: Vec<bool>,
    overlay_open: bool,
    overlay_opt_out: bool,
    overlay_scroll: usize,
    /// Target whose view should be scrolled into place after the next compose.
    pending_scroll: Option<String>,
    /// Width the content column was last composed for.
    composed_width: u16,
    dirty: bool,
}

impl App {
    fn new(root: PathBuf, manifest: Manifest, prefs: Prefs, prefs_path: Option<PathBuf>) -> App {
        let (tx, rx) = mpsc::channel();
        let collapsed = vec![false; manifest.groups.len()];
        let overlay_open = !prefs.hide_handbook;
        let overlay_opt_out = prefs.hide_handbook;
        let mut app = App {
            store: BookStore::new(root),
            manifest,
            reader: SectionSlot::new(),
            handbook: HandbookSlot::new(),
            prefs,
            prefs_path,
            tx,
            rx,
            lines: Vec::new(),
            ranges: Vec::new(),
            scroll: 0,
            selected: 0,
            collapsed,
            overlay_open,
            overlay_opt_out,
            overlay_scroll: 0,
            pending_scroll: None,
            composed_width: 0,
            dirty: true,
        };
        if app.overlay_open {
            app.ensure_handbook();
        }
        app
    }

    fn nav_entries(&self) -> Vec<NavEntry> {
        let mut entries = vec![NavEntry::View(nav::HOME), NavEntry::View(nav::HANDBOOK)];
        for (gi, group) in self.manifest.groups.iter().enumerate() {
            entries.push(NavEntry::Group(gi));
            if !self.collapsed[gi] {
                for si in 0..group.sections.len() {
                    entries.push(NavEntry::Section {
                        group: gi,
                        index: si,
                    });
                }
            }
        }
        entries
    }

    /// Start the handbook load unless one already ran.
    fn ensure_handbook(&mut self) {
        if self.handbook.status != SlotStatus::Unloaded {
            return;
        }
        self.handbook.begin();
        self.dirty = true;
        let store = BookStore::new(self.store.root().to_path_buf());
        let tx = self.tx.clone();
        thread::spawn(move || {
            let result = handbook::load_document(&store);
            let _ = tx.send(LoadOutcome::Handbook { result });
        });
    }

    /// Kick off a section fetch on a worker thread. The token ties the
    /// completion back to this request; a stale completion is discarded.
    fn begin_fetch(&mut self, target: &str) {
        let label = self
            .manifest
            .label_for(target)
            .unwrap_or(target)
            .to_string();
        let key = self.manifest.resolve_key(target);
        let token = self.reader.begin(target, &label);
        self.dirty = true;
        let store = BookStore::new(self.store.root().to_path_buf());
        let tx = self.tx.clone();
        thread::spawn(move || {
            let result = fetch_first(&store, &key).map(|payload| interpret::interpret(&payload));
            let _ = tx.send(LoadOutcome::Section { token, result });
        });
    }

    /// Navigate to a target. Reserved views scroll into place; section
    /// targets run the load pipeline unless the reader already holds them.
    /// Menu activation and the startup --target flag both land here.
    fn goto(&mut self, target: &str) {
        if target == nav::HANDBOOK {
            self.ensure_handbook();
            self.queue_scroll(target);
            return;
        }
        if target == nav::HOME {
            self.queue_scroll(target);
            return;
        }
        if self.reader.is_loaded_for(target) {
            self.queue_scroll(target);
            return;
        }
        self.begin_fetch(target);
        self.queue_scroll(target);
    }

    fn queue_scroll(&mut self, target: &str) {
        self.pending_scroll = Some(target.to_string());
    }

    /// Apply worker completions. Stale section outcomes are dropped by the
    /// slot itself; only applied ones mark the column dirty.
    fn drain_outcomes(&mut self) {
        while let Ok(outcome) = self.rx.try_recv() {
            match outcome {
                LoadOutcome::Section { token, result } => {
                    if self.reader.complete(token, result) {
                        self.dirty = true;
                    }
                }
                LoadOutcome::Handbook { result } => {
                    self.handbook.complete(result);
                    self.dirty = true;
                }
            }
        }
    }

    /// Re-read the manifest and refetch whatever is on screen.
    fn reload(&mut self) {
        match Manifest::load(self.store.root()) {
            Ok(manifest) => {
                self.collapsed.resize(manifest.groups.len(), false);
                self.manifest = manifest;
                if let Some(target) = self.reader.target.clone() {
                    self.begin_fetch(&target);
                }
                if self.handbook.status != SlotStatus::Unloaded {
                    self.handbook = HandbookSlot::new();
                    self.ensure_handbook();
                }
                self.selected = self.selected.min(self.nav_entries().len().saturating_sub(1));
                self.dirty = true;
                eprintln!("[reload] manifest refreshed");
            }
            Err(err) => {
                eprintln!("[reload] failed err={err}");
            }
        }
    }

    fn select_next(&mut self) {
        let last = self.nav_entries().len().saturating_sub(1);
        self.selected = (self.selected + 1).min(last);
    }

    fn select_prev(&mut self) {
        self.selected = self.selected.saturating_sub(1);
    }

    fn activate_selected(&mut self) {
        let entries = self.nav_entries();
        match entries.get(self.selected).cloned() {
            Some(NavEntry::View(view)) => self.goto(view),
            Some(NavEntry::Group(gi)) => self.toggle_group(gi),
            Some(NavEntry::Section { group, index }) => {
                let id = self.manifest.groups[group].sections[index].id.clone();
                self.goto(&id);
            }
            None => {}
        }
    }

    fn toggle_selected_group(&mut self) {
        if let Some(NavEntry::Group(gi)) = self.nav_entries().get(self.selected).cloned() {
            self.toggle_group(gi);
        }
    }

    fn toggle_group(&mut self, group: usize) {
        if let Some(flag) = self.collapsed.get_mut(group) {
            *flag = !*flag;
        }
        self.selected = self.selected.min(self.nav_entries().len().saturating_sub(1));
    }

    fn open_overlay(&mut self) {
        self.overlay_open = true;
        self.overlay_scroll = 0;
        self.overlay_opt_out = self.prefs.hide_handbook;
        self.ensure_handbook();
    }

    /// Close the overlay and persist the opt-out choice if it changed.
    fn close_overlay(&mut self) {
        self.overlay_open = false;
        if self.prefs.hide_handbook != self.overlay_opt_out {
            self.prefs.hide_handbook = self.overlay_opt_out;
            if let Some(ref path) = self.prefs_path {
                match self.prefs.store_to(path) {
                    Ok(()) => {
                        eprintln!("[prefs] stored hide_handbook={}", self.prefs.hide_handbook)
                    }
                    Err(err) => eprintln!("[prefs] store failed err={err}"),
                }
            }
        }
    }

    /// Compose the content column for `width`: home view, handbook view,
    /// then the reader once it owns a target. Wrapping happens here so the
    /// recorded line ranges are exact.
    fn compose(&mut self, width: u16) {
        let mut lines: Vec<Line<'static>> = Vec::new();
        let mut ranges: Vec<ViewRange> = Vec::new();

        let start = lines.len();
        lines.push(Line::from(Span::styled(
            self.manifest.title.clone(),
            render::heading_style(1),
        )));
        if !self.manifest.blurb.is_empty() {
            for chunk in render::wrap_plain(&self.manifest.blurb, width as usize) {
                lines.push(dim_line(chunk));
            }
        }
        lines.push(Line::from(""));
        for chunk in render::wrap_plain(
            "\u{2191}/\u{2193} select  Enter open  Space fold  j/k scroll  H handbook  r reload  q quit",
            width as usize,
        ) {
            lines.push(dim_line(chunk));
        }
        lines.push(Line::from(""));
        ranges.push(ViewRange {
            target: nav::HOME.to_string(),
            start,
            len: lines.len() - start,
        });

        let start = lines.len();
        lines.push(Line::from(Span::styled(
            "Handbook".to_string(),
            render::heading_style(2),
        )));
        match self.handbook.status {
            SlotStatus::Unloaded => {
                lines.push(dim_line("Open Handbook from the contents to load it."));
            }
            SlotStatus::Loading => lines.push(dim_line("Loading handbook\u{2026}")),
            SlotStatus::Loaded => {
                if let Some(ref markdown) = self.handbook.markdown {
                    lines.extend(render::render_markdown(markdown, width));
                }
            }
            SlotStatus::Failed => {
                let message = self
                    .handbook
                    .error
                    .clone()
                    .unwrap_or_else(|| "unknown error".to_string());
                lines.extend(render::error_lines(&message, width));
            }
        }
        lines.push(Line::from(""));
        ranges.push(ViewRange {
            target: nav::HANDBOOK.to_string(),
            start,
            len: lines.len() - start,
        });

        if let Some(target) = self.reader.target.clone() {
            let start = lines.len();
            lines.push(Line::from(Span::styled(
                self.reader.label.clone(),
                render::heading_style(2),
            )));
            match self.reader.status {
                SlotStatus::Unloaded => {}
                SlotStatus::Loading => {
                    lines.push(dim_line(format!("Loading {}\u{2026}", self.reader.label)));
                }
                SlotStatus::Loaded => {
                    if let Some(ref tree) = self.reader.tree {
                        lines.extend(render::render_tree(tree, width).lines);
                    }
                }
                SlotStatus::Failed => {
                    let message = self
                        .reader
                        .error
                        .clone()
                        .unwrap_or_else(|| "unknown error".to_string());
                    lines.extend(render::error_lines(&message, width));
                }
            }
            ranges.push(ViewRange {
                target,
                start,
                len: lines.len() - start,
            });
        }

        self.lines = lines;
        self.ranges = ranges;
        self.composed_width = width;
        self.dirty = false;
    }

    /// Sidebar label for a view target.
    fn view_label(&self, target: &str) -> String {
        if target == nav::HOME {
            return "Home".to_string();
        }
        if target == nav::HANDBOOK {
            return "Handbook".to_string();
        }
        self.manifest
            .label_for(target)
            .unwrap_or(target)
            .to_string()
    }
}

fn dim_line(text: impl Into<String>) -> Line<'static> {
    Line::from(Span::styled(
        text.into(),
        Style::default().fg(Color::DarkGray),
    ))
}

fn content_width_for(total: u16) -> u16 {
    total.saturating_sub(SIDEBAR_WIDTH + 1).max(16)
}

fn run(terminal: &mut DefaultTerminal, app: &mut App) -> io::Result<()> {
    loop {
        app.drain_outcomes();

        let size = terminal.size()?;
        let content_width = content_width_for(size.width);
        if app.dirty || app.composed_width != content_width {
            app.compose(content_width);
        }
        if let Some(target) = app.pending_scroll.take() {
            if let Some(range) = app.ranges.iter().find(|r| r.target == target) {
                app.scroll = range.start;
            }
        }

        // Recalculate bounds and clamp scroll offset on every pass, including
        // after Event::Resize, so the view stays valid after terminal resize.
        let viewport_height = size.height.saturating_sub(1) as usize;
        let max_scroll = app.lines.len().saturating_sub(viewport_height);
        app.scroll = app.scroll.min(max_scroll);

        terminal.draw(|frame| ui(frame, app))?;

        // Poll with a tick so worker completions surface without input.
        if !event::poll(Duration::from_millis(50))? {
            continue;
        }
        let ev = event::read()?;

        if let Event::Key(key) = ev {
            if key.kind != KeyEventKind::Press {
                continue;
            }

            if app.overlay_open {
                // Overlay mode: dismissal is the explicit close action only.
                match key.code {
                    KeyCode::Enter => app.close_overlay(),
                    KeyCode::Char('d') => app.overlay_opt_out = !app.overlay_opt_out,
                    KeyCode::Char('j') | KeyCode::Down => {
                        app.overlay_scroll = app.overlay_scroll.saturating_add(1);
                    }
                    KeyCode::Char('k') | KeyCode::Up => {
                        app.overlay_scroll = app.overlay_scroll.saturating_sub(1);
                    }
                    KeyCode::Char('q') => return Ok(()),
                    _ => {}
                }
                continue;
            }

            match key.code {
                KeyCode::Char('q') => return Ok(()),

                // Single line down/up
                KeyCode::Char('j') => {
                    app.scroll = (app.scroll + 1).min(max_scroll);
                }
                KeyCode::Char('k') => {
                    app.scroll = app.scroll.saturating_sub(1);
                }

                // Half page down
                KeyCode::Char('d') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                    let half = viewport_height / 2;
                    app.scroll = (app.scroll + half).min(max_scroll);
                }
                KeyCode::PageDown => {
                    let half = viewport_height / 2;
                    app.scroll = (app.scroll + half).min(max_scroll);
                }

                // Half page up
                KeyCode::Char('u') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                    let half = viewport_height / 2;
                    app.scroll = app.scroll.saturating_sub(half);
                }
                KeyCode::PageUp => {
                    let half = viewport_height / 2;
                    app.scroll = app.scroll.saturating_sub(half);
                }

                // Jump to top / bottom
                KeyCode::Char('g') | KeyCode::Home => app.scroll = 0,
                KeyCode::Char('G') | KeyCode::End => app.scroll = max_scroll,

                // Sidebar selection
                KeyCode::Down => app.select_next(),
                KeyCode::Up => app.select_prev(),
                KeyCode::Enter => app.activate_selected(),
                KeyCode::Char(' ') => app.toggle_selected_group(),

                KeyCode::Char('H') => app.open_overlay(),
                KeyCode::Char('r') => app.reload(),

                _ => {}
            }
        }
    }
}

fn ui(frame: &mut Frame, app: &App) {
    let area = frame.area();

    // Minimum usable terminal size: room for the sidebar, some content
    // columns, and the status bar.
    const MIN_WIDTH: u16 = 36;
    const MIN_HEIGHT: u16 = 6;
    if area.width < MIN_WIDTH || area.height < MIN_HEIGHT {
        render_size_warning(frame, area);
        return;
    }

    let [body, status_row] =
        Layout::vertical([Constraint::Min(1), Constraint::Length(1)]).areas(area);
    let [nav_pane, content_pane] =
        Layout::horizontal([Constraint::Length(SIDEBAR_WIDTH), Constraint::Min(1)]).areas(body);

    let viewport_height = content_pane.height as usize;
    let active_target =
        active_view(&app.ranges, app.scroll, viewport_height).map(|range| range.target.clone());

    render_sidebar(frame, app, active_target.as_deref(), nav_pane);

    let widget = Paragraph::new(app.lines.clone()).scroll((app.scroll as u16, 0));
    frame.render_widget(widget, content_pane);

    render_status_bar(
        frame,
        app,
        active_target.as_deref(),
        viewport_height,
        status_row,
    );

    if app.overlay_open {
        render_handbook_overlay(frame, app, body);
    }
}

fn render_size_warning(frame: &mut Frame, area: Rect) {
    let msg = "Terminal too small";
    let width = (msg.len() as u16).min(area.width);
    if width == 0 || area.height == 0 {
        return;
    }
    let x = area.x + area.width.saturating_sub(width) / 2;
    let strip = Rect::new(x, area.y + area.height / 2, width, 1);
    let style = Style::default().fg(Color::Red).add_modifier(Modifier::BOLD);
    frame.render_widget(Paragraph::new(Span::styled(msg, style)), strip);
}

fn render_sidebar(frame: &mut Frame, app: &App, active_target: Option<&str>, area: Rect) {
    let entries = app.nav_entries();
    let viewport = area.height as usize;

    // Keep the selected row roughly centered once the list outgrows the pane.
    let max_offset = entries.len().saturating_sub(viewport);
    let offset = app.selected.saturating_sub(viewport / 2).min(max_offset);

    let mut lines: Vec<Line<'static>> = Vec::new();
    for (idx, entry) in entries.iter().enumerate().skip(offset).take(viewport) {
        let (text, entry_target) = match entry {
            NavEntry::View(view) => (app.view_label(view), Some(view.to_string())),
            NavEntry::Group(gi) => {
                let marker = if app.collapsed[*gi] {
                    "\u{25b8}"
                } else {
                    "\u{25be}"
                };
                (format!("{marker} {}", app.manifest.groups[*gi].label), None)
            }
            NavEntry::Section { group, index } => {
                let section = &app.manifest.groups[*group].sections[*index];
                (format!("  {}", section.label), Some(section.id.clone()))
            }
        };

        let mut style = match entry {
            NavEntry::Group(_) => Style::default()
                .fg(Color::DarkGray)
                .add_modifier(Modifier::BOLD),
            _ => Style::default(),
        };
        if entry_target.is_some() && entry_target.as_deref() == active_target {
            style = Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD);
        }
        if idx == app.selected {
            style = style.add_modifier(Modifier::REVERSED);
        }

        lines.push(Line::from(Span::styled(text, style)));
    }

    frame.render_widget(Paragraph::new(lines), area);
}

fn render_status_bar(
    frame: &mut Frame,
    app: &App,
    active_target: Option<&str>,
    viewport_height: usize,
    area: Rect,
) {
    let total_lines = app.lines.len();
    let position = if total_lines == 0 {
        "Empty".to_owned()
    } else if total_lines <= viewport_height {
        "All".to_owned()
    } else if app.scroll == 0 {
        "Top".to_owned()
    } else if app.scroll >= total_lines.saturating_sub(viewport_height) {
        "Bot".to_owned()
    } else {
        let pct = (app.scroll * 100) / total_lines;
        format!("{pct}%")
    };

    let view_info = active_target
        .map(|target| format!("  \u{00A7} {}", app.view_label(target)))
        .unwrap_or_default();

    let loading_info = if app.reader.status == SlotStatus::Loading {
        format!("  \u{2026} loading {}", app.reader.label)
    } else {
        String::new()
    };

    let status = format!(
        " Line {}/{} \u{2014} {}{}{}",
        app.scroll + 1,
        total_lines,
        position,
        view_info,
        loading_info,
    );
    let status_bar = Paragraph::new(Span::styled(
        status,
        Style::default().fg(Color::Black).bg(Color::White),
    ))
    .style(Style::default().bg(Color::White));
    frame.render_widget(status_bar, area);
}

/// Compute a centered rectangle within `area`.
fn centered_rect(percent_x: u16, percent_y: u16, area: Rect) -> Rect {
    let w = (area.width * percent_x / 100).max(30).min(area.width);
    let h = (area.height * percent_y / 100).max(5).min(area.height);
    let x = area.x + area.width.saturating_sub(w) / 2;
    let y = area.y + area.height.saturating_sub(h) / 2;
    Rect::new(x, y, w, h)
}

/// Render the handbook overlay. It closes on Enter only; the opt-out
/// checkbox is toggled with `d` and persisted on close.
fn render_handbook_overlay(frame: &mut Frame, app: &App, viewport_area: Rect) {
    let popup = centered_rect(70, 70, viewport_area);

    frame.render_widget(Clear, popup);

    let inner_width = popup.width.saturating_sub(2);
    let mut lines: Vec<Line<'static>> = Vec::new();
    match app.handbook.status {
        SlotStatus::Unloaded | SlotStatus::Loading => {
            lines.push(dim_line("Loading handbook\u{2026}"));
        }
        SlotStatus::Loaded => {
            if let Some(ref markdown) = app.handbook.markdown {
                lines = render::render_markdown(markdown, inner_width);
            }
        }
        SlotStatus::Failed => {
            let message = app
                .handbook
                .error
                .clone()
                .unwrap_or_else(|| "unknown error".to_string());
            lines = render::error_lines(&message, inner_width);
        }
    }

    lines.push(Line::from(""));
    let checkbox = if app.overlay_opt_out { "[x]" } else { "[ ]" };
    lines.push(Line::from(Span::styled(
        format!("{checkbox} Do not show this again  (d toggles)"),
        Style::default().fg(Color::Yellow),
    )));
    lines.push(dim_line("Enter closes  j/k scroll"));

    let block = Block::bordered()
        .title(" Handbook ")
        .style(Style::default().fg(Color::White));

    let paragraph = Paragraph::new(lines)
        .block(block)
        .scroll((app.overlay_scroll as u16, 0));

    frame.render_widget(paragraph, popup);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn book_dir() -> tempfile::TempDir {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("toc.json"),
            r#"{
                "title": "Atlas",
                "blurb": "A reference",
                "groups": [
                    { "label": "Basics", "sections": [
                        { "id": "qi", "label": "Qi" },
                        { "id": "law", "label": "Law" }
                    ] },
                    { "label": "Places", "sections": [
                        { "id": "north", "label": "The North" }
                    ] }
                ]
            }"#,
        )
        .unwrap();
        std::fs::create_dir(dir.path().join("data")).unwrap();
        dir
    }

    fn app_for(dir: &tempfile::TempDir) -> App {
        let manifest = Manifest::load(dir.path()).unwrap();
        App::new(
            dir.path().to_path_buf(),
            manifest,
            Prefs {
                hide_handbook: true,
            },
            None,
        )
    }

    #[test]
    fn nav_entries_follow_fold_state() {
        let dir = book_dir();
        let mut app = app_for(&dir);

        let entries = app.nav_entries();
        // home, handbook, group, 2 sections, group, 1 section
        assert_eq!(entries.len(), 7);
        assert_eq!(entries[0], NavEntry::View(nav::HOME));
        assert_eq!(entries[2], NavEntry::Group(0));

        app.toggle_group(0);
        let folded = app.nav_entries();
        assert_eq!(folded.len(), 5);
        assert_eq!(folded[3], NavEntry::Group(1));
    }

    #[test]
    fn fold_clamps_selection() {
        let dir = book_dir();
        let mut app = app_for(&dir);
        app.selected = app.nav_entries().len() - 1;
        app.toggle_group(0);
        app.toggle_group(1);
        assert!(app.selected < app.nav_entries().len());
    }

    #[test]
    fn compose_records_contiguous_ranges() {
        let dir = book_dir();
        let mut app = app_for(&dir);
        app.compose(60);

        assert_eq!(app.ranges.len(), 2); // no reader before first navigation
        assert_eq!(app.ranges[0].target, nav::HOME);
        assert_eq!(app.ranges[0].start, 0);
        assert_eq!(app.ranges[1].target, nav::HANDBOOK);
        assert_eq!(app.ranges[1].start, app.ranges[0].start + app.ranges[0].len);
        assert_eq!(
            app.lines.len(),
            app.ranges.iter().map(|r| r.len).sum::<usize>()
        );
    }

    #[test]
    fn reader_view_appears_after_navigation() {
        let dir = book_dir();
        std::fs::write(dir.path().join("data").join("qi.json"), r#"["a"]"#).unwrap();
        let mut app = app_for(&dir);

        app.goto("qi");
        assert_eq!(app.pending_scroll.as_deref(), Some("qi"));
        assert_eq!(app.reader.target.as_deref(), Some("qi"));
        assert_eq!(app.reader.label, "Qi");

        app.compose(60);
        assert_eq!(app.ranges.len(), 3);
        assert_eq!(app.ranges[2].target, "qi");
        assert!(app.ranges[2].len >= 2); // label line plus at least one body line
    }

    #[test]
    fn goto_loaded_target_only_scrolls() {
        let dir = book_dir();
        let mut app = app_for(&dir);
        let token = app.reader.begin("qi", "Qi");
        assert!(app
            .reader
            .complete(token, Ok(crate::interpret::DisplayTree { nodes: vec![] })));

        app.pending_scroll = None;
        app.goto("qi");
        assert_eq!(app.pending_scroll.as_deref(), Some("qi"));
        // Still the same completed load; no new fetch began.
        assert_eq!(app.reader.status, SlotStatus::Loaded);
    }

    #[test]
    fn overlay_close_persists_opt_out() {
        let dir = book_dir();
        let prefs_dir = tempfile::TempDir::new().unwrap();
        let prefs_path = prefs_dir.path().join("prefs.json");
        let manifest = Manifest::load(dir.path()).unwrap();
        let mut app = App::new(
            dir.path().to_path_buf(),
            manifest,
            Prefs::default(),
            Some(prefs_path.clone()),
        );
        assert!(app.overlay_open);

        app.overlay_opt_out = true;
        app.close_overlay();
        assert!(!app.overlay_open);

        let stored = Prefs::load_from(Some(&prefs_path));
        assert!(stored.hide_handbook);
    }

    #[test]
    fn content_width_leaves_room_for_sidebar() {
        assert_eq!(content_width_for(80), 80 - SIDEBAR_WIDTH - 1);
        // Never collapses to an unusable width.
        assert_eq!(content_width_for(10), 16);
    }
}
