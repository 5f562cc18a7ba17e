/// Row sink used by administrative commands. Rendering (tables, JSON,
/// anything user-facing) lives above the storage core.
pub trait ResultWriter {
    fn header(&mut self, columns: &[&str]);
    fn row(&mut self, cells: Vec<String>);
}

/// Collects rows in memory; what the tests and embedding callers use.
#[derive(Debug, Default)]
pub struct BufferedWriter {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl BufferedWriter {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ResultWriter for BufferedWriter {
    fn header(&mut self, columns: &[&str]) {
        self.columns = columns.iter().map(|c| c.to_string()).collect();
    }

    fn row(&mut self, cells: Vec<String>) {
        self.rows.push(cells);
    }
}
