//! Login captchas: short codes kept in memory for a few minutes and rendered
//! as SVG data URLs.

use base64::Engine;
use rand::Rng;
use std::{
    collections::HashMap,
    fmt::Write,
    sync::{Mutex, PoisonError},
    time::{Duration, Instant},
};
use uuid::Uuid;

pub const CAPTCHA_TTL: Duration = Duration::from_secs(5 * 60);
const CODE_LEN: usize = 4;
// no 0/O, 1/I
const ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
const WIDTH: u32 = 120;
const HEIGHT: u32 = 40;

#[derive(Clone, Debug)]
pub struct Captcha {
    pub uuid: Uuid,
    pub code: String,
}

#[derive(Debug)]
pub struct CaptchaStore {
    ttl: Duration,
    entries: Mutex<HashMap<Uuid, (String, Instant)>>,
}

impl Default for CaptchaStore {
    fn default() -> Self {
        Self::new(CAPTCHA_TTL)
    }
}

impl CaptchaStore {
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn issue(&self) -> Captcha {
        let mut rng = rand::thread_rng();
        let code: String = (0..CODE_LEN)
            .map(|_| char::from(ALPHABET[rng.gen_range(0..ALPHABET.len())]))
            .collect();
        let uuid = Uuid::new_v4();
        let now = Instant::now();

        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.retain(|_, (_, expires)| *expires > now);
        entries.insert(uuid, (code.clone(), now + self.ttl));

        Captcha { uuid, code }
    }

    /// Check a code, case-insensitively. A captcha is consumed by the first
    /// check, whatever its outcome.
    pub fn verify(&self, uuid: &str, code: &str) -> bool {
        let Ok(uuid) = Uuid::parse_str(uuid.trim()) else {
            return false;
        };
        let entry = self
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&uuid);

        entry.is_some_and(|(expected, expires)| {
            expires > Instant::now() && expected.eq_ignore_ascii_case(code.trim())
        })
    }
}

/// Render `code` as a `data:image/svg+xml;base64,...` URL.
#[must_use]
pub fn render_data_url(code: &str) -> String {
    let mut rng = rand::thread_rng();
    let mut svg = format!(
        r##"<svg xmlns="http://www.w3.org/2000/svg" width="{WIDTH}" height="{HEIGHT}" viewBox="0 0 {WIDTH} {HEIGHT}"><rect width="100%" height="100%" fill="#f3f4f6"/>"##
    );

    for _ in 0..4 {
        let _ = write!(
            svg,
            r##"<line x1="{}" y1="{}" x2="{}" y2="{}" stroke="#9ca3af" stroke-width="1"/>"##,
            rng.gen_range(0..WIDTH),
            rng.gen_range(0..HEIGHT),
            rng.gen_range(0..WIDTH),
            rng.gen_range(0..HEIGHT),
        );
    }

    let step = WIDTH / (u32::try_from(code.len()).unwrap_or(1).max(1) + 1);
    for (index, ch) in code.chars().enumerate() {
        let x = step * (u32::try_from(index).unwrap_or(0) + 1);
        let y = rng.gen_range(26..32);
        let angle = rng.gen_range(-25..=25);
        let _ = write!(
            svg,
            r##"<text x="{x}" y="{y}" font-family="monospace" font-size="24" font-weight="bold" fill="#1f2937" text-anchor="middle" transform="rotate({angle} {x} {y})">{ch}</text>"##
        );
    }
    svg.push_str("</svg>");

    format!(
        "data:image/svg+xml;base64,{}",
        base64::engine::general_purpose::STANDARD.encode(svg)
    )
}
