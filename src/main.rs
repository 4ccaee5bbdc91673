use anyhow::{anyhow, bail, Context, Result};
use std::env;
use std::path::Path;
use tracing_subscriber::EnvFilter;

use envelope_budget::{
    allocate_from, compute_catch_up_amount, load_categories_csv, load_training_csv, AppConfig,
    BudgetMonth, CallerContext, Category, CategoryProvider, Classifier, MatchSource, SqliteStore,
};

const USAGE: &str = "\
Usage: envelope-budget <command> [args]

Commands:
  init [categories.csv]                    Create the database, optionally import categories
  classify <merchant>                      Suggest a category for a merchant string
  learn <merchant> <category_id>           Confirm a merchant → category assignment
  train <csv>                              Learn from a merchant,category_id CSV
  reassign <rule_id> <category_id>         Point a rule at another category
  rules                                    List learned rules
  group <name> <merchant>...               Create a merchant group and map merchants to it
  allocate <amount> [YYYY-MM] [--apply]    Plan (and optionally record) a funding run
  catch-up <category_id> [YYYY-MM] [--ytd <amount>]
                                           Year-to-date shortfall of an accumulation category";

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = env::args().skip(1).collect();
    let Some(command) = args.first() else {
        println!("{}", USAGE);
        return Ok(());
    };

    let config = AppConfig::load().context("Failed to load configuration")?;
    let rest = &args[1..];

    match command.as_str() {
        "init" => run_init(&config, rest),
        "classify" => run_classify(&config, rest),
        "learn" => run_learn(&config, rest),
        "train" => run_train(&config, rest),
        "reassign" => run_reassign(&config, rest),
        "rules" => run_rules(&config),
        "group" => run_group(&config, rest),
        "allocate" => run_allocate(&config, rest),
        "catch-up" => run_catch_up(&config, rest),
        "help" | "--help" | "-h" => {
            println!("{}", USAGE);
            Ok(())
        }
        other => bail!("Unknown command: {}\n\n{}", other, USAGE),
    }
}

// ============================================================================
// SETUP
// ============================================================================

fn open_store(config: &AppConfig) -> Result<SqliteStore> {
    SqliteStore::open(&config.database_path)
        .with_context(|| format!("Failed to open database {:?}", config.database_path))
}

fn open_classifier(config: &AppConfig) -> Result<Classifier<SqliteStore>> {
    let keywords = config.keyword_table().context("Failed to load keyword table")?;
    Ok(Classifier::with_config(
        open_store(config)?,
        keywords,
        config.classifier.clone(),
    ))
}

fn caller(config: &AppConfig) -> Result<CallerContext> {
    CallerContext::new(&config.user_id).context("ENVELOPE_USER / user_id must not be blank")
}

fn arg<'a>(rest: &'a [String], index: usize, name: &str) -> Result<&'a str> {
    rest.get(index)
        .map(String::as_str)
        .ok_or_else(|| anyhow!("Missing argument <{}>\n\n{}", name, USAGE))
}

fn parse_id(value: &str, name: &str) -> Result<i64> {
    value
        .parse()
        .with_context(|| format!("<{}> must be an integer, got {:?}", name, value))
}

fn parse_month(value: Option<&String>) -> Result<BudgetMonth> {
    match value {
        Some(s) => Ok(BudgetMonth::parse(s)?),
        None => Ok(BudgetMonth::current()),
    }
}

// ============================================================================
// COMMANDS
// ============================================================================

fn run_init(config: &AppConfig, rest: &[String]) -> Result<()> {
    println!("🗄️  Setting up {:?}", config.database_path);
    let store = open_store(config)?;
    println!("✓ Schema ready (WAL mode)");

    if let Some(csv_path) = rest.first() {
        let categories = load_categories_csv(Path::new(csv_path))
            .with_context(|| format!("Failed to read categories from {}", csv_path))?;
        for category in &categories {
            store.save_category(category)?;
        }
        println!("✓ Imported {} categories", categories.len());
    }

    Ok(())
}

fn run_classify(config: &AppConfig, rest: &[String]) -> Result<()> {
    let merchant = arg(rest, 0, "merchant")?;
    let classifier = open_classifier(config)?;
    let ctx = caller(config)?;

    let categories = classifier.store().categories()?;
    let valid: Vec<_> = categories.iter().map(|c| c.to_ref()).collect();

    match classifier.classify(&ctx, merchant, &valid)? {
        Some(result) => {
            let name = categories
                .iter()
                .find(|c| c.id == result.category_id)
                .map(|c| c.name.as_str())
                .unwrap_or("?");
            let source = match result.source {
                MatchSource::Learned => "learned",
                MatchSource::Keyword => "keyword",
            };
            println!(
                "{} → {} (#{})  confidence {:.2}  [{}]",
                merchant, name, result.category_id, result.confidence, source
            );
        }
        None => println!("{} → no suggestion", merchant),
    }

    Ok(())
}

fn run_learn(config: &AppConfig, rest: &[String]) -> Result<()> {
    let merchant = arg(rest, 0, "merchant")?;
    let category_id = parse_id(arg(rest, 1, "category_id")?, "category_id")?;

    let classifier = open_classifier(config)?;
    let rule = classifier.learn(&caller(config)?, merchant, category_id)?;

    println!(
        "✓ Rule #{}: {} → #{}  (used {}x, confidence {})",
        rule.id, merchant, rule.category_id, rule.usage_count, rule.confidence_score
    );
    Ok(())
}

fn run_train(config: &AppConfig, rest: &[String]) -> Result<()> {
    let csv_path = arg(rest, 0, "csv")?;
    let rows = load_training_csv(Path::new(csv_path))
        .with_context(|| format!("Failed to read training data from {}", csv_path))?;
    println!("📂 Loaded {} confirmations", rows.len());

    let classifier = open_classifier(config)?;
    let report = classifier.learn_batch(
        &caller(config)?,
        rows.into_iter().map(|row| (row.merchant, row.category_id)),
    );

    println!("✓ Learned: {}", report.learned);
    if report.failed > 0 {
        println!("⚠️  Skipped: {}", report.failed);
        for (index, error) in &report.errors {
            println!("   row {}: {}", index + 1, error);
        }
    }
    Ok(())
}

fn run_reassign(config: &AppConfig, rest: &[String]) -> Result<()> {
    let rule_id = parse_id(arg(rest, 0, "rule_id")?, "rule_id")?;
    let category_id = parse_id(arg(rest, 1, "category_id")?, "category_id")?;

    let classifier = open_classifier(config)?;
    let rule = classifier.reassign_rule_category(&caller(config)?, rule_id, category_id)?;

    if rule.id == rule_id {
        println!("✓ Rule #{} now points at #{}", rule.id, rule.category_id);
    } else {
        println!(
            "✓ Rule #{} merged into #{} (used {}x, confidence {})",
            rule_id, rule.id, rule.usage_count, rule.confidence_score
        );
    }
    Ok(())
}

fn run_rules(config: &AppConfig) -> Result<()> {
    let classifier = open_classifier(config)?;
    let rules = classifier.list_rules(&caller(config)?)?;

    if rules.is_empty() {
        println!("No rules learned yet");
        return Ok(());
    }

    println!("{:>5}  {:<32} {:>8} {:>6} {:>5}", "ID", "MERCHANT", "CATEGORY", "CONF", "USES");
    for rule in &rules {
        let merchant = match rule.identity.pattern() {
            Some(pattern) => pattern.to_string(),
            None => format!("group:{}", rule.identity.group_id().unwrap_or_default()),
        };
        println!(
            "{:>5}  {:<32} {:>8} {:>6} {:>5}",
            rule.id, merchant, rule.category_id, rule.confidence_score, rule.usage_count
        );
    }
    Ok(())
}

fn run_group(config: &AppConfig, rest: &[String]) -> Result<()> {
    let name = arg(rest, 0, "name")?;
    if rest.len() < 2 {
        bail!("group needs at least one merchant\n\n{}", USAGE);
    }

    let classifier = open_classifier(config)?;
    let ctx = caller(config)?;
    let group = classifier.create_merchant_group(&ctx, name)?;

    for merchant in &rest[1..] {
        classifier.assign_merchant_to_group(&ctx, merchant, &group.id)?;
    }

    println!("✓ Group {:?} ({}) with {} merchants", group.name, group.id, rest.len() - 1);
    Ok(())
}

fn run_allocate(config: &AppConfig, rest: &[String]) -> Result<()> {
    let apply = rest.iter().any(|a| a == "--apply");
    let positional: Vec<&String> = rest.iter().filter(|a| *a != "--apply").collect();

    let amount_str = positional
        .first()
        .ok_or_else(|| anyhow!("Missing argument <amount>\n\n{}", USAGE))?;
    let amount: f64 = amount_str
        .parse()
        .with_context(|| format!("<amount> must be a number, got {:?}", amount_str))?;
    let month = parse_month(positional.get(1).copied())?;

    let store = open_store(config)?;
    let result = if apply {
        store.allocate_and_record(amount, month)?
    } else {
        allocate_from(&store, amount, month)?
    };
    let names: std::collections::HashMap<i64, String> = store
        .categories()?
        .into_iter()
        .map(|c| (c.id, c.name))
        .collect();

    println!("💰 Allocation for {} - {:.2} available", month, amount);
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("{:>3}  {:<24} {:>10} {:>10} {:>10}", "P", "CATEGORY", "TARGET", "FUNDED", "ALLOCATED");
    for plan in &result.allocations {
        println!(
            "{:>3}  {:<24} {:>10.2} {:>10.2} {:>10.2}",
            plan.priority,
            names.get(&plan.category_id).map(String::as_str).unwrap_or("?"),
            plan.target_amount,
            plan.funded_this_month,
            plan.allocated_amount
        );
    }
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("Allocated: {:.2}   Remaining: {:.2}", result.total_allocated, result.remaining_funds);

    if apply {
        println!("✓ Recorded");
    }
    Ok(())
}

fn run_catch_up(config: &AppConfig, rest: &[String]) -> Result<()> {
    let category_id = parse_id(arg(rest, 0, "category_id")?, "category_id")?;

    let mut month = None;
    let mut ytd_override = None;
    let mut args = rest[1..].iter();
    while let Some(a) = args.next() {
        if a == "--ytd" {
            let value = args
                .next()
                .ok_or_else(|| anyhow!("--ytd needs an amount\n\n{}", USAGE))?;
            let ytd: f64 = value
                .parse()
                .with_context(|| format!("--ytd must be a number, got {:?}", value))?;
            ytd_override = Some(ytd);
        } else {
            month = Some(a);
        }
    }
    let month = parse_month(month)?;

    let store = open_store(config)?;
    let category = store
        .get_category(category_id)?
        .ok_or_else(|| anyhow!("Category #{} not found", category_id))?;

    let ytd_funded = match ytd_override {
        Some(ytd) => ytd,
        None => store.ytd_funded(category_id, month)?,
    };

    println!("{}", catch_up_line(&category, ytd_funded, month));
    Ok(())
}

fn catch_up_line(category: &Category, ytd_funded: f64, month: BudgetMonth) -> String {
    let shortfall = compute_catch_up_amount(category, ytd_funded, month);
    if shortfall > 0.0 {
        format!(
            "{}: behind schedule by {:.2} through {} ({:.2} funded of {:.2} per year)",
            category.name,
            shortfall,
            month,
            ytd_funded,
            category.annual_target_or_default()
        )
    } else {
        format!("{}: on schedule through {} ({:.2} funded)", category.name, month, ytd_funded)
    }
}
