use std::io::Read;
use std::path::Path;

use anyhow::{Context, Result};
use ctrl_learn::utils::logging;
use ctrl_learn::{Backends, Config, Session};

/// 用法: `ctrl-learn <file|->`
///
/// 读取代码并提交一次，等待所有字段结束后以 JSON 输出最终视图。
#[tokio::main]
async fn main() -> Result<()> {
    // 加载配置
    let config = Config::load().context("加载配置失败")?;

    // 初始化日志
    logging::init(config.verbose_logging);
    logging::log_startup(&config);

    let source = std::env::args().nth(1).unwrap_or_else(|| "-".to_string());
    let code = read_code(&source)?;

    let session = Session::new(Backends::from_config(&config), &config);
    session.submit(code);

    let view = session.wait_settled().await;
    logging::log_view_summary(&view);

    let json = serde_json::to_string_pretty(view.as_ref()).context("序列化视图失败")?;
    println!("{}", json);

    Ok(())
}

fn read_code(source: &str) -> Result<String> {
    if source == "-" {
        let mut code = String::new();
        std::io::stdin()
            .read_to_string(&mut code)
            .context("读取标准输入失败")?;
        Ok(code)
    } else {
        std::fs::read_to_string(Path::new(source))
            .with_context(|| format!("读取代码文件失败: {}", source))
    }
}
