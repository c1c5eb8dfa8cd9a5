use crate::prelude::*;

#[derive(Clone, Debug, Default, PartialEq)]
pub struct SessionStats {
    pub frames_received: u64,
    pub frames_sent: u64,
    // Transport faults
    pub timeouts: u64,
    pub checksum_faults: u64,
    pub echo_faults: u64,
    // Decoder faults
    pub unknown_keys: u64,
    pub sequence_faults: u64,
    pub timestring_failures: u64,
    // Output
    pub live_records: u64,
    pub archive_records: u64,
    pub commands_run: u64,
    pub commands_failed: u64,
    pub commands_missing: u64,
}

impl SessionStats {
    pub fn print_summary(&self) {
        info!("Session Statistics:");
        info!("  Frames received: {}", self.frames_received);
        info!("  Frames sent: {}", self.frames_sent);
        info!("  Transport:");
        info!("    Timeouts: {}", self.timeouts);
        info!("    Checksum/header faults: {}", self.checksum_faults);
        info!("    Echo faults: {}", self.echo_faults);
        info!("  Decoder:");
        info!("    Unknown keys: {}", self.unknown_keys);
        info!("    Archive sequence faults: {}", self.sequence_faults);
        info!("    Timestring failures: {}", self.timestring_failures);
        info!("  Records:");
        info!("    Live: {}", self.live_records);
        info!("    Archive: {}", self.archive_records);
        info!("  Commands:");
        info!("    Run: {}", self.commands_run);
        info!("    Failed: {}", self.commands_failed);
        info!("    Missing from script: {}", self.commands_missing);
    }
}
