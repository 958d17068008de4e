use anyhow::{anyhow, Context, Result};
use assessment_engine::database::{Database, NewOption};
use assessment_engine::models::ExamType;
use assessment_engine::store::AssessmentStore;
use serde::Deserialize;
use std::env;

const BUNDLED_CATALOG: &str = include_str!("../../data/catalog.json");

#[derive(Debug, Deserialize)]
struct Catalog {
    exams: Vec<SeedExam>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SeedExam {
    exam_type: ExamType,
    name: String,
    topics: Vec<SeedTopic>,
}

#[derive(Debug, Deserialize)]
struct SeedTopic {
    name: String,
    questions: Vec<SeedQuestion>,
}

#[derive(Debug, Deserialize)]
struct SeedQuestion {
    text: String,
    #[serde(default)]
    difficulty: Option<String>,
    options: Vec<NewOption>,
}

#[derive(Debug, Default)]
struct SeedStats {
    exams_created: usize,
    exams_skipped: usize,
    topics_created: usize,
    questions_created: usize,
}

impl SeedStats {
    fn print_summary(&self, dry_run: bool) {
        println!("\n=== Seed Summary ===");
        if dry_run {
            println!("Exams that WOULD BE created: {}", self.exams_created);
            println!("Topics that WOULD BE created: {}", self.topics_created);
            println!("Questions that WOULD BE created: {}", self.questions_created);
            println!("\n** DRY RUN MODE - No changes were made **");
        } else {
            println!("Exams created: {}", self.exams_created);
            println!("Topics created: {}", self.topics_created);
            println!("Questions created: {}", self.questions_created);
        }
        if self.exams_skipped > 0 {
            println!("Exams already present (skipped): {}", self.exams_skipped);
        }
    }
}

fn check_catalog(catalog: &Catalog) -> Result<()> {
    for exam in &catalog.exams {
        for topic in &exam.topics {
            for question in &topic.questions {
                let correct = question.options.iter().filter(|option| option.is_correct).count();
                if correct != 1 {
                    return Err(anyhow!(
                        "question \"{}\" in topic \"{}\" has {} correct options, expected exactly one",
                        question.text,
                        topic.name,
                        correct
                    ));
                }
            }
        }
    }
    Ok(())
}

async fn seed_exam(db: &Database, seed: &SeedExam, dry_run: bool, stats: &mut SeedStats) -> Result<()> {
    if db.find_exam(seed.exam_type).await?.is_some() {
        println!("- Exam {} already exists, skipping", seed.name);
        stats.exams_skipped += 1;
        return Ok(());
    }

    stats.exams_created += 1;
    stats.topics_created += seed.topics.len();
    stats.questions_created += seed.topics.iter().map(|topic| topic.questions.len()).sum::<usize>();

    if dry_run {
        println!("\nExam: {}", seed.name);
        for topic in &seed.topics {
            println!("  Topic: {} ({} questions)", topic.name, topic.questions.len());
        }
        return Ok(());
    }

    let exam = db.create_exam(&seed.name).await?;
    for topic in &seed.topics {
        let stored = db.create_topic(&exam.id, &topic.name).await?;
        for question in &topic.questions {
            db.create_question(&stored.id, &question.text, question.difficulty.as_deref(), &question.options)
                .await?;
        }
        println!("✓ Seeded topic \"{}\" for {}", topic.name, seed.name);
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let args: Vec<String> = env::args().skip(1).collect();
    let dry_run = args.iter().any(|arg| arg == "--dry-run");
    let catalog_path = args.iter().find(|arg| !arg.starts_with("--"));

    println!("=== Exam Catalog Seeder ===");
    if dry_run {
        println!("** RUNNING IN DRY-RUN MODE **");
    }

    let raw = match catalog_path {
        Some(path) => {
            println!("Reading catalog from {}", path);
            std::fs::read_to_string(path).with_context(|| format!("could not read catalog file {}", path))?
        }
        None => {
            println!("Using bundled catalog");
            BUNDLED_CATALOG.to_string()
        }
    };
    let catalog: Catalog = serde_json::from_str(&raw).context("catalog file is not valid JSON")?;
    check_catalog(&catalog)?;

    let database_url = env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite:assessment_engine.db?mode=rwc".to_string());

    println!("\nConnecting to database: {}", database_url);
    let db = Database::new(&database_url).await?;

    let mut stats = SeedStats::default();
    for seed in &catalog.exams {
        seed_exam(&db, seed, dry_run, &mut stats).await?;
    }

    stats.print_summary(dry_run);
    Ok(())
}
