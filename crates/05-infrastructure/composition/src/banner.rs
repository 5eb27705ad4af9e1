//! 启动横幅

/// 是否显示横幅
pub const BANNER_VISIBLE_KEY: &str = "spring.banner.visible";

const BANNER: &str = r"
  _                        ____             _
 | |    ___  _ __ _ __    / ___| _ __  _ __(_)_ __   __ _
 | |   / _ \| '__| '_ \   \___ \| '_ \| '__| | '_ \ / _` |
 | |__| (_) | |  | | | |   ___) | |_) | |  | | | | | (_| |
 |_____\___/|_|  |_| |_|  |____/| .__/|_|  |_|_| |_|\__, |
                                |_|                  |___/
";

/// 渲染横幅
pub fn render(application: &str) -> String {
    format!(
        "{}\n :: {} ::  (v{})\n",
        BANNER.trim_start_matches('\n'),
        application,
        env!("CARGO_PKG_VERSION")
    )
}
