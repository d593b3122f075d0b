use crate::format::codec::DEFAULT_ZSTD_LEVEL;

/// Upper bound of the concurrent-merge series count tried by the selector.
pub const DEFAULT_MAX_SERIES_NUM: usize = 1024;

#[derive(Debug, Clone)]
pub struct MergeOption {
    pub(crate) max_series_num: usize,
    pub(crate) page_point_limit: usize,
    pub(crate) page_size_threshold: usize,
    pub(crate) zstd_level: i32,
}

impl Default for MergeOption {
    fn default() -> Self {
        MergeOption {
            max_series_num: DEFAULT_MAX_SERIES_NUM,
            page_point_limit: 1024 * 1024,
            page_size_threshold: 64 * 1024,
            zstd_level: DEFAULT_ZSTD_LEVEL,
        }
    }
}

impl MergeOption {
    pub fn max_series_num(self, max_series_num: usize) -> Self {
        MergeOption {
            max_series_num,
            ..self
        }
    }

    pub fn page_point_limit(self, page_point_limit: usize) -> Self {
        MergeOption {
            page_point_limit,
            ..self
        }
    }

    pub fn page_size_threshold(self, page_size_threshold: usize) -> Self {
        MergeOption {
            page_size_threshold,
            ..self
        }
    }

    pub fn zstd_level(self, zstd_level: i32) -> Self {
        MergeOption { zstd_level, ..self }
    }
}

impl MergeOption {
    pub(crate) fn series_limit(&self) -> usize {
        self.max_series_num.max(1)
    }

    pub(crate) fn page_limits(&self) -> (usize, usize) {
        (self.page_point_limit.max(1), self.page_size_threshold.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn setters_override_defaults() {
        let option = MergeOption::default();
        assert_eq!(option.max_series_num, 1024);

        let option = option.max_series_num(0).page_point_limit(16).zstd_level(9);
        assert_eq!(option.series_limit(), 1);
        assert_eq!(option.page_limits(), (16, 64 * 1024));
        assert_eq!(option.zstd_level, 9);
    }
}
