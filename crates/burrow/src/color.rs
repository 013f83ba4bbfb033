//! CLI color functions.
//!
//! All functions respect `NO_COLOR`, `FORCE_COLOR` and TTY detection via
//! `owo-colors`' `if_supports_color()`. `--no-color` sets an in-process flag
//! that bypasses owo-colors entirely.

use std::sync::atomic::{AtomicBool, Ordering};

use owo_colors::OwoColorize;
use owo_colors::Stream::{Stderr, Stdout};

/// Set by `--no-color`.
static NO_COLOR_FLAG: AtomicBool = AtomicBool::new(false);

/// Call once from main.rs when `--no-color` is passed.
pub fn set_no_color() {
    NO_COLOR_FLAG.store(true, Ordering::Relaxed);
}

#[derive(Debug, Clone, Copy)]
struct Rgb {
    r: u8,
    g: u8,
    b: u8,
}

impl Rgb {
    const fn from_hex(hex: u32) -> Self {
        Self {
            r: ((hex >> 16) & 0xFF) as u8,
            g: ((hex >> 8) & 0xFF) as u8,
            b: (hex & 0xFF) as u8,
        }
    }
}

const ICE: Rgb = Rgb::from_hex(0x7CB4C8); // Session names
const AURORA: Rgb = Rgb::from_hex(0x6B8F5E); // Running/success
const COPPER: Rgb = Rgb::from_hex(0xC49A5C); // Warning/starting
const EMBER: Rgb = Rgb::from_hex(0xB87060); // Error/killed
const MUTED: Rgb = Rgb::from_hex(0x5C6370); // Borders, hints

fn no_color() -> bool {
    NO_COLOR_FLAG.load(Ordering::Relaxed)
}

fn paint(text: &str, stream: owo_colors::Stream, rgb: Rgb) -> String {
    if no_color() {
        return text.to_string();
    }
    text.if_supports_color(stream, |t| t.truecolor(rgb.r, rgb.g, rgb.b))
        .to_string()
}

pub fn ice(text: &str) -> String {
    paint(text, Stdout, ICE)
}

pub fn aurora(text: &str) -> String {
    paint(text, Stdout, AURORA)
}

pub fn copper(text: &str) -> String {
    paint(text, Stdout, COPPER)
}

pub fn ember(text: &str) -> String {
    paint(text, Stdout, EMBER)
}

pub fn muted(text: &str) -> String {
    paint(text, Stdout, MUTED)
}

/// Bold text for table headers.
pub fn bold(text: &str) -> String {
    if no_color() {
        return text.to_string();
    }
    text.if_supports_color(Stdout, |t| t.bold()).to_string()
}

/// Color a session status. Matches on the trimmed text so padded cells work.
pub fn status(status_str: &str) -> String {
    match status_str.trim_end() {
        "running" => aurora(status_str),
        "starting" => copper(status_str),
        "draining" => ember(status_str),
        _ => status_str.to_string(),
    }
}

/// Error styling for stderr.
pub fn error(text: &str) -> String {
    paint(text, Stderr, EMBER)
}

/// Warning styling for stderr.
pub fn warning(text: &str) -> String {
    paint(text, Stderr, COPPER)
}

/// Secondary info on stderr.
pub fn hint(text: &str) -> String {
    paint(text, Stderr, MUTED)
}
