//! Logging and debugging facilities for Horizon Grid.
//!
//! This module provides:
//! - Target and span names used with the `tracing` crate
//! - Tree-drawing primitives shared by element tree dumps
//!
//! # Tracing Integration
//!
//! Horizon Grid uses the `tracing` crate for instrumentation. To see logs,
//! install a subscriber in your application:
//!
//! ```ignore
//! fn main() {
//!     tracing_subscriber::fmt()
//!         .with_env_filter("horizon_grid_core::dispatch=trace,horizon_grid=debug")
//!         .init();
//! }
//! ```

use std::fmt::Write as FmtWrite;

/// Span names used throughout Horizon Grid for tracing.
pub mod span_names {
    /// Cell recomputation span.
    pub const RECALC: &str = "horizon_grid::recalc";
}

/// Target names for log filtering.
///
/// Use these with `tracing` directives to filter logs by subsystem.
pub mod targets {
    /// Core crate target.
    pub const CORE: &str = "horizon_grid_core";
    /// Event dispatch and veto handling.
    pub const DISPATCH: &str = "horizon_grid_core::dispatch";
    /// Listener registration.
    pub const LISTENER: &str = "horizon_grid_core::listener";
    /// Worker pools.
    pub const POOL: &str = "horizon_grid_core::pool";
    /// Fault reports.
    pub const FAULT: &str = "horizon_grid_core::fault";
    /// Table structure changes.
    pub const TABLE: &str = "horizon_grid::table";
    /// Pending recomputation.
    pub const PENDING: &str = "horizon_grid::pending";
}

/// Style options for tree visualization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TreeStyle {
    /// ASCII characters for tree branches.
    Ascii,
    /// Unicode box-drawing characters.
    #[default]
    Unicode,
    /// Compact single-line representation.
    Compact,
}

/// Configuration for tree debug output.
#[derive(Debug, Clone)]
pub struct TreeFormatOptions {
    /// The style of tree visualization.
    pub style: TreeStyle,
    /// Whether to show element IDs.
    pub show_ids: bool,
    /// Whether to show listener counts.
    pub show_listeners: bool,
    /// Whether to show cell values.
    pub show_values: bool,
    /// Maximum depth to traverse (None for unlimited).
    pub max_depth: Option<usize>,
    /// Indent size for each level.
    pub indent_size: usize,
}

impl Default for TreeFormatOptions {
    fn default() -> Self {
        Self {
            style: TreeStyle::default(),
            show_ids: true,
            show_listeners: false,
            show_values: true,
            max_depth: None,
            indent_size: 2,
        }
    }
}

impl TreeFormatOptions {
    /// Create options for detailed debugging output.
    pub fn detailed() -> Self {
        Self {
            show_listeners: true,
            ..Default::default()
        }
    }

    /// Create options for minimal output.
    pub fn minimal() -> Self {
        Self {
            show_ids: false,
            show_listeners: false,
            show_values: false,
            ..Default::default()
        }
    }

    /// Whether nodes at `depth` should be written.
    pub fn within_depth(&self, depth: usize) -> bool {
        self.max_depth.is_none_or(|max| depth <= max)
    }
}

/// Writes indented tree lines into a string.
///
/// Nodes are written depth-first; `is_last` tells the writer that no further
/// sibling follows, so the levels below it draw no branch line.
#[derive(Debug)]
pub struct TreeWriter<'a> {
    options: &'a TreeFormatOptions,
    output: String,
    /// For each open level, whether its current node was the last sibling.
    last: Vec<bool>,
}

impl<'a> TreeWriter<'a> {
    /// Create a writer with the given options.
    pub fn new(options: &'a TreeFormatOptions) -> Self {
        Self {
            options,
            output: String::new(),
            last: Vec::new(),
        }
    }

    /// The options in effect.
    pub fn options(&self) -> &TreeFormatOptions {
        self.options
    }

    /// Write a header line with no prefix.
    pub fn header(&mut self, text: &str) {
        self.last.clear();
        self.output.push_str(text);
        self.output.push('\n');
    }

    /// Write one node line.
    pub fn node(&mut self, depth: usize, is_last: bool, text: &str) {
        if !self.options.within_depth(depth) {
            return;
        }
        let prefix = self.build_prefix(depth, is_last);
        // Writing into a String cannot fail.
        let _ = writeln!(self.output, "{prefix}{text}");
        if depth > 0 {
            self.last.truncate(depth - 1);
            self.last.resize(depth - 1, false);
            self.last.push(is_last);
        }
    }

    /// Write a detail line under the node at `depth`.
    pub fn detail(&mut self, depth: usize, text: &str) {
        if !self.options.within_depth(depth) {
            return;
        }
        let prefix = self.build_detail_prefix(depth);
        let _ = writeln!(self.output, "{prefix}  .{text}");
    }

    /// Finish and return the text.
    pub fn finish(self) -> String {
        self.output
    }

    /// Build the prefix string for a tree node.
    fn build_prefix(&self, depth: usize, is_last: bool) -> String {
        if depth == 0 {
            return String::new();
        }

        let (corner, last) = match self.options.style {
            TreeStyle::Ascii => ("+--", "`--"),
            TreeStyle::Unicode => ("\u{251c}\u{2500}\u{2500}", "\u{2514}\u{2500}\u{2500}"),
            TreeStyle::Compact => ("-", "-"),
        };

        let mut prefix = self.ancestor_columns(depth - 1);
        prefix.push_str(if is_last { last } else { corner });
        prefix.push(' ');
        prefix
    }

    /// Build the prefix for detail lines.
    fn build_detail_prefix(&self, depth: usize) -> String {
        self.ancestor_columns(depth)
    }

    /// One column per level in `1..=levels`: a branch line where that level
    /// has more siblings to come, blank where it is finished.
    fn ancestor_columns(&self, levels: usize) -> String {
        let branch = match self.options.style {
            TreeStyle::Ascii => "|",
            TreeStyle::Unicode => "\u{2502}",
            TreeStyle::Compact => "",
        };

        let mut prefix = String::new();
        for level in 0..levels {
            let finished = self.last.get(level).copied().unwrap_or(false);
            if finished {
                prefix.extend(std::iter::repeat_n(' ', branch.chars().count()));
            } else {
                prefix.push_str(branch);
            }
            prefix.extend(std::iter::repeat_n(' ', self.options.indent_size));
        }
        prefix
    }
}
