/// Counters for debugging a capture worker.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CaptureDiagnostics {
    pub chunks_read: u64,
    pub bytes_captured: u64,
    pub empty_reads: u64,
    pub non_fatal_errors: u64,
}
