use clap::{Parser, Subcommand};
use memolink::prelude::*;
use std::sync::Arc;
use tracing::warn;

// ── 命令行 ────────────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "memolink", version, about = "记忆图谱同步客户端")]
struct Cli {
    /// YAML 配置文件，缺省时从环境变量读取
    #[arg(long)]
    config: Option<String>,

    #[arg(long)]
    api_url: Option<String>,

    /// 登录令牌（JWT）
    #[arg(long, env = "MEMOLINK_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// 缓存文件路径
    #[arg(long)]
    cache: Option<String>,

    /// 离线模式：不发起任何网络请求
    #[arg(long)]
    offline: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// 列出记忆
    List {
        #[arg(long)]
        search: Option<String>,
        #[arg(long)]
        tag: Option<String>,
        /// newest | oldest | az | za
        #[arg(long, default_value = "newest")]
        sort: String,
    },
    /// 新建记忆
    Add {
        title: String,
        #[arg(long, default_value = "")]
        description: String,
        #[arg(long, default_value = "")]
        image: String,
        #[arg(long = "tag")]
        tags: Vec<String>,
        #[arg(long)]
        date: Option<String>,
    },
    /// 修改记忆
    Update {
        id: String,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        description: Option<String>,
        #[arg(long = "tag")]
        tags: Vec<String>,
    },
    /// 删除记忆及其连接
    Delete { id: String },
    /// 移动记忆到画布坐标
    Move { id: String, x: f64, y: f64 },
    /// 连接两条记忆
    Connect { source: String, target: String },
    /// 删除连接
    Disconnect { id: String },
    /// 加载下一页
    More,
    /// 与某条记忆相连的记忆
    Neighbors { id: String },
    /// 所有标签
    Tags,
    /// 当前用户资料
    Profile,
    /// 升级为会员
    Upgrade,
    /// 切换深色模式
    DarkMode,
    /// 清空本地数据
    Clear,
    /// 退出登录并删除本地缓存
    Logout,
}

fn parse_sort(raw: &str) -> SortOrder {
    match raw {
        "oldest" => SortOrder::DateOldest,
        "az" => SortOrder::TitleAz,
        "za" => SortOrder::TitleZa,
        _ => SortOrder::DateNewest,
    }
}

fn print_memory(memory: &Memory) {
    let tags: Vec<&str> = memory.tags.iter().map(String::as_str).collect();
    let position = memory
        .position
        .map(|p| format!(" @ ({:.0}, {:.0})", p.x, p.y))
        .unwrap_or_default();
    println!(
        "  [{}] {}{}  {}",
        memory.id,
        memory.title,
        position,
        if tags.is_empty() {
            String::new()
        } else {
            format!("#{}", tags.join(" #"))
        }
    );
}

// ── 入口 ──────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "memolink=info".into()),
        )
        .init();

    let mut config = match &cli.config {
        Some(path) => ClientConfig::load(path)?,
        None => ClientConfig::from_env()?,
    };
    if let Some(api_url) = &cli.api_url {
        config.api_url = api_url.clone();
    }
    if let Some(cache) = &cli.cache {
        config.cache_path = cache.clone();
    }

    let session = match (&cli.token, cli.offline) {
        (Some(token), false) => SessionHandle::with_session(Session::from_token(token.clone())),
        (None, false) => {
            warn!("⚠️ 未提供令牌，以离线模式运行");
            SessionHandle::anonymous()
        }
        (_, true) => SessionHandle::anonymous(),
    };

    let gateway = Arc::new(HttpGateway::new(&config, session.clone())?);
    let cache = Arc::new(FileCache::new(&config.cache_path)?);
    let sync = MemorySync::builder(gateway, session)
        .cache(cache)
        .config(&config)
        .build();

    if let Err(e) = sync.bootstrap().await {
        warn!("⚠️ 远端加载失败，使用缓存数据: {e}");
    }
    let outcome = run(&sync, cli.command).await;
    sync.flush().await;
    outcome
}

async fn run(sync: &MemorySync, command: Command) -> Result<()> {
    match command {
        Command::List { search, tag, sort } => {
            let mut query = AlbumQuery::default().sort(parse_sort(&sort));
            if let Some(search) = search {
                query = query.search(search);
            }
            if let Some(tag) = tag {
                query = query.tag(tag);
            }
            let memories = sync.album(&query);
            let total = sync
                .total_count()
                .map(|n| n.to_string())
                .unwrap_or_else(|| "?".to_string());
            println!("📚 {} 条记忆（服务端共 {}）", memories.len(), total);
            for memory in &memories {
                print_memory(memory);
            }
            if sync.has_more() {
                println!("  …还有更多，使用 `memolink more` 加载");
            }
        }
        Command::Add {
            title,
            description,
            image,
            tags,
            date,
        } => {
            let mut draft = MemoryDraft::new(title).description(description).image(image);
            for tag in tags {
                draft = draft.tag(tag);
            }
            if let Some(date) = date {
                draft = draft.date(date);
            }
            let memory = sync.create(draft).await?;
            println!("✅ 已新建");
            print_memory(&memory);
        }
        Command::Update {
            id,
            title,
            description,
            tags,
        } => {
            let mut patch = MemoryPatch::default();
            if let Some(title) = title {
                patch = patch.title(title);
            }
            if let Some(description) = description {
                patch = patch.description(description);
            }
            if !tags.is_empty() {
                patch = patch.tags(tags);
            }
            if patch.is_empty() {
                println!("⏭️ 没有需要修改的字段");
                return Ok(());
            }
            let memory = sync.update(&id, patch).await?;
            println!("✅ 已修改");
            print_memory(&memory);
        }
        Command::Delete { id } => {
            sync.delete(&id).await?;
            println!("🗑️ 已删除 {}", id);
        }
        Command::Move { id, x, y } => {
            // 命令行需要等待远端结果后再退出，走普通更新路径
            let memory = sync
                .update(&id, MemoryPatch::position(Position::new(x, y)))
                .await?;
            print_memory(&memory);
        }
        Command::Connect { source, target } => match sync.connect(&source, &target).await? {
            Some(connection) => println!("🔗 已连接 [{}] {} ↔ {}", connection.id, source, target),
            None => println!("⏭️ {} 与 {} 已经相连", source, target),
        },
        Command::Disconnect { id } => {
            sync.disconnect(&id).await?;
            println!("✂️ 已删除连接 {}", id);
        }
        Command::More => {
            let appended = sync.load_more().await?;
            println!(
                "📄 新增 {} 条，当前共 {} 条{}",
                appended,
                sync.memories().len(),
                if sync.has_more() { "" } else { "（已全部加载）" }
            );
        }
        Command::Neighbors { id } => {
            let neighbors = sync.neighbors(&id);
            println!("➡️ 指向:");
            neighbors.outgoing.iter().for_each(print_memory);
            println!("⬅️ 来自:");
            neighbors.incoming.iter().for_each(print_memory);
        }
        Command::Tags => {
            for tag in sync.all_tags() {
                println!("  #{}", tag);
            }
        }
        Command::Profile => {
            let profile = sync.load_profile().await?;
            let quota = match profile.quota() {
                Some(limit) => format!("{}/{}", sync.memories().len(), limit),
                None => "不限".to_string(),
            };
            println!("👤 {} <{}>", profile.name, profile.email);
            println!("   会员: {}  条数: {}", if profile.is_premium { "是" } else { "否" }, quota);
        }
        Command::Upgrade => {
            let profile = sync.upgrade_premium().await?;
            println!("⭐ {} 已升级为会员", profile.name);
        }
        Command::DarkMode => {
            let enabled = sync.toggle_dark_mode();
            println!("🌓 深色模式: {}", if enabled { "开" } else { "关" });
        }
        Command::Clear => {
            sync.clear_all().await;
            println!("🧹 本地数据已清空");
        }
        Command::Logout => {
            if sync.logout().await.is_some() {
                println!("🚪 已退出登录");
            } else {
                println!("⏭️ 当前未登录");
            }
        }
    }
    Ok(())
}
