//! 通用常量.

/// 单通道标签值.
pub mod gray {
    /// 标签体中背景的体素值.
    pub const BACKGROUND: u8 = 0;

    /// 二值化后前景的体素值.
    pub const FOREGROUND: u8 = 1;

    /// 默认前景下限 (含). 二值化时 `[1, 100]` 内的体素视为前景.
    pub const FOREGROUND_LOWER: u8 = 1;

    /// 默认前景上限 (含).
    pub const FOREGROUND_UPPER: u8 = 100;

    /// 像素是否是背景?
    #[inline]
    pub const fn is_background(p: u8) -> bool {
        matches!(p, BACKGROUND)
    }

    /// 像素是否是前景 (任意非零值)?
    #[inline]
    pub const fn is_foreground(p: u8) -> bool {
        !is_background(p)
    }
}

/// 每个病例目录下运行元数据的文件名.
pub const META_FILENAME: &str = "results.json";

/// 术中首个 (覆盖整个前列腺的) 配准序列的规范描述标记.
pub const COVER_PROSTATE: &str = "COVER PROSTATE";

/// 目录清单中标识覆盖前列腺序列的文件名片段.
pub const COVER_PROSTATE_FILE_TOKEN: &str = "-T2-COVER-PROSTATE-";

/// 穿刺针引导序列的类型名.
pub const GUIDANCE_SERIES: &str = "GUIDANCE";

/// 一立方厘米对应的立方毫米数.
pub const MM3_PER_CC: f64 = 1000.0;
