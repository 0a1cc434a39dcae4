/// Point-in-time operational counters.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Metrics {
    pub exported:     i64,
    pub received:     i64,
    pub dropped:      i64,
    pub flows:        i64,
    pub conns:        i64,
    pub with_ipfix:   bool,
    pub with_column:  bool,
    pub with_bucket:  bool,
    pub with_logfile: bool,
}
