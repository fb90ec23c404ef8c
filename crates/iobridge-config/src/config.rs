/// Limits applied when loading a board catalog from disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CatalogConfig {
    /// When true, a file may replace a built-in preset of the same name.
    pub allow_preset_override: bool,
    /// Maximum number of descriptors loaded from a directory.
    pub max_boards_from_directory: usize,
    /// Maximum bytes allowed per descriptor file.
    pub max_board_file_size: usize,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            allow_preset_override: false,
            max_boards_from_directory: 64,
            max_board_file_size: 64 * 1024,
        }
    }
}
