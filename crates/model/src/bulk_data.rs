use num_rational::Ratio;

use rand::distr::{Alphanumeric, Distribution, SampleString};
use rand::rngs::SmallRng;
use rand::seq::IndexedRandom;
use rand::{Rng, SeedableRng};

/// One synthetic `tbl_logs` line, already split into fields.
///
/// Well-formed lines carry all 11 fields; malformed ones are cut short.
#[derive(Debug, Clone, PartialEq)]
pub struct LogLine(Vec<String>);

impl LogLine {
    pub fn fields(&self) -> &[String] {
        &self.0
    }

    pub fn is_well_formed(&self) -> bool {
        self.0.len() == crate::Schema::TBL_LOGS_COLUMNS.len()
    }

    pub fn serialize_tsv<W>(&self, writer: &mut csv::Writer<W>) -> anyhow::Result<()>
    where
        W: std::io::Write,
    {
        for field in &self.0 {
            writer.write_field(field)?;
        }
        writer.write_record(None::<&[u8]>)?;
        Ok(())
    }
}

/// Log time, seconds since the epoch.
#[derive(Debug, Clone, Copy, PartialEq)]
struct LogTime(u64);

impl LogTime {
    const BOUNDARY: u64 = 1742817035;

    fn new_random(rng: &mut impl Rng) -> Self {
        LogTime(rng.random_range(0..Self::BOUNDARY))
    }

    fn render(self) -> String {
        let secs = self.0 % 86_400;
        let days = self.0 / 86_400;
        format!(
            "day{days} {:02}:{:02}:{:02}",
            secs / 3600,
            (secs / 60) % 60,
            secs % 60
        )
    }
}

/// Endless stream of synthetic access-log lines.
///
/// A share of lines reuse an earlier row key (the "major" pool) so that loads
/// exercise last-write-wins, and a smaller share is truncated so that the
/// decoder has something to reject.
pub struct LogLineGenerator {
    rng: SmallRng,
    next_id: u64,
    major_pool: Vec<u64>,
}

impl LogLineGenerator {
    const MAJOR_IDS: Ratio<u32> = Ratio::new_raw(1, 100);
    const REPEATED_IDS: Ratio<u32> = Ratio::new_raw(5, 100);
    const MALFORMED_LINES: Ratio<u32> = Ratio::new_raw(1, 200);

    const TOKEN_LENGTH: usize = 32;

    pub fn new() -> Self {
        Self::with_rng(SmallRng::from_os_rng())
    }

    pub fn seeded(seed: u64) -> Self {
        Self::with_rng(SmallRng::seed_from_u64(seed))
    }

    fn with_rng(rng: SmallRng) -> Self {
        LogLineGenerator {
            rng,
            next_id: 1,
            major_pool: Vec::new(),
        }
    }

    fn random_ratio(&mut self, ratio: Ratio<u32>) -> bool {
        self.rng.random_ratio(*ratio.numer(), *ratio.denom())
    }

    fn token(&mut self, len: usize) -> String {
        Alphanumeric.sample_string(&mut self.rng, len)
    }

    fn pick_id(&mut self) -> u64 {
        if self.random_ratio(Self::REPEATED_IDS) {
            if let Some(id) = self.major_pool.choose(&mut self.rng) {
                return *id;
            }
        }
        let id = self.next_id;
        self.next_id += 1;
        if self.random_ratio(Self::MAJOR_IDS) {
            self.major_pool.push(id);
        }
        id
    }

    fn remote_ip(&mut self) -> String {
        let octets: [u8; 4] = self.rng.random();
        format!("{}.{}.{}.{}", octets[0], octets[1], octets[2], octets[3])
    }
}

impl Default for LogLineGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl Iterator for LogLineGenerator {
    type Item = LogLine;

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.pick_id();
        let log_id = self.rng.random_range(1..=3u8);
        let remote_ip = self.remote_ip();
        let ticket = self.token(Self::TOKEN_LENGTH);
        let session = self.token(Self::TOKEN_LENGTH);
        let user = self.rng.random_range(1..1000u32);
        let cookie = self.token(Self::TOKEN_LENGTH / 2);
        let agent = UserAgent.sample(&mut self.rng);
        let page = self.rng.random_range(1..500u32);
        let log_time = LogTime::new_random(&mut self.rng).render();

        let mut fields = vec![
            id.to_string(),
            log_id.to_string(),
            remote_ip,
            ticket,
            session,
            user.to_string(),
            cookie,
            agent.to_string(),
            "http://www.example.com/".to_string(),
            format!("http://www.example.com/product/{page}.html"),
            log_time,
        ];
        if self.random_ratio(Self::MALFORMED_LINES) {
            let keep = self.rng.random_range(1..fields.len());
            fields.truncate(keep);
        }
        Some(LogLine(fields))
    }
}

struct UserAgent;

impl Distribution<&'static str> for UserAgent {
    fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> &'static str {
        const AGENTS: [&str; 4] = [
            "Mozilla/5.0 (Windows NT 10.0; Win64; x64)",
            "Mozilla/5.0 (Macintosh; Intel Mac OS X 14_4)",
            "Mozilla/5.0 (X11; Linux x86_64)",
            "Mozilla/5.0 (iPhone; CPU iPhone OS 17_4 like Mac OS X)",
        ];
        AGENTS[rng.random_range(0..AGENTS.len())]
    }
}
