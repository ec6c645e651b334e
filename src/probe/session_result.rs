use std::fmt::{Display, Formatter};

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Role {
    Sender,
    Receiver,
}

impl Display for Role {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Sender => write!(f, "sender"),
            Role::Receiver => write!(f, "receiver"),
        }
    }
}

/// One probing round's outcome on one side
#[derive(Debug, Clone, PartialEq)]
pub struct LevelResult {
    /// 0 for the calibration burst
    pub level: u16,
    /// None for the calibration burst, which is not paced
    pub target_rate_mbps: Option<f64>,
    /// 0.0 if fewer than two packets were sent / received
    pub achieved_rate_mbps: f64,
    pub num_packets: usize,
}

impl LevelResult {
    pub fn is_measurable(&self) -> bool {
        self.achieved_rate_mbps > 0.0
    }
}

/// A single side's series of achieved rates: index 0 is the calibration burst, index k the
///  rate level k. The Sender's series is r_in, the Receiver's is r_out.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionResult {
    pub role: Role,
    pub delta_r_mbps: f64,
    pub levels: Vec<LevelResult>,
}

impl SessionResult {
    /// the series as a CSV row, rates formatted with two decimals
    pub fn to_csv_row(&self) -> String {
        self.levels.iter()
            .map(|l| format!("{:.2}", l.achieved_rate_mbps))
            .collect::<Vec<_>>()
            .join(",")
    }
}
