use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use sage::chat::{ChatSession, Message, MessageStatus, Role, Transcript, TranscriptView};
use sage::profile::SessionProfile;
use sage::settings::{Settings, SettingsStore};
use sage::study::{ReviewGrade, ReviewReport, ReviewSession};
use sage_backend::{
    ActivityKind, ActivityRecord, AuthSession, BackendConfig, BackendError, DetailLevel,
    Difficulty, ExplainRequest, HttpBackend, LoginRequest, PracticeRequest, ProgressSummary,
    RegisterRequest, TutorBackend, VoiceTurnRequest,
};
use snafu::{ResultExt, Snafu};
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};

type InputLines = Lines<BufReader<Stdin>>;

#[derive(Debug, Snafu)]
enum RunnerError {
    #[snafu(display("could not start the backend client on `{stage}`: {source}"))]
    Startup {
        stage: &'static str,
        source: BackendError,
    },
}

type RunnerResult<T> = Result<T, RunnerError>;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();
    if let Err(error) = run().await {
        eprintln!("sage: {error}");
        std::process::exit(1);
    }
}

/// Line-oriented front-end over the streaming session controller.
///
/// One task loop multiplexes two sources: transcript change notifications
/// (rendered incrementally) and stdin lines (commands, or chat input for
/// anything that does not start with `/`). Mid-loop errors print and the
/// loop continues; only startup can fail the process.
async fn run() -> RunnerResult<()> {
    let settings = Arc::new(SettingsStore::load());
    let base_url = settings.settings().base_url.clone();
    let backend = Arc::new(HttpBackend::new(BackendConfig::new(base_url)).context(
        StartupSnafu {
            stage: "backend-client",
        },
    )?);
    let profile = SessionProfile::generate();
    tracing::info!(
        session_id = %profile.session_id,
        base_url = %backend.config().base_url,
        "session ready"
    );

    let session = ChatSession::new(
        Arc::clone(&backend) as Arc<dyn TutorBackend>,
        Arc::clone(&settings),
        profile,
    );
    let mut view = session.view();
    let peek = session.view();
    let mut runner = Runner {
        backend,
        settings,
        session,
        peek,
        auth: None,
    };

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut printer = StreamPrinter::default();

    print_welcome(&runner.settings.settings());
    prompt();

    loop {
        tokio::select! {
            biased;
            alive = view.changed() => {
                if alive && printer.render(&view.snapshot()) {
                    prompt();
                }
            }
            line = lines.next_line() => {
                let line = match line {
                    Ok(Some(line)) => line,
                    Ok(None) => break,
                    Err(error) => {
                        tracing::warn!(error = %error, "standard input closed unexpectedly");
                        break;
                    }
                };
                let line = line.trim();
                if line == "/quit" {
                    break;
                }
                if !line.is_empty() {
                    runner.dispatch(&mut lines, &mut printer, line).await;
                }
                if !printer.active && !runner.session.is_streaming() {
                    prompt();
                }
            }
        }
    }

    println!("bye 👋");
    Ok(())
}

struct Runner {
    backend: Arc<HttpBackend>,
    settings: Arc<SettingsStore>,
    session: ChatSession,
    peek: TranscriptView,
    auth: Option<AuthSession>,
}

impl Runner {
    async fn dispatch(&mut self, lines: &mut InputLines, printer: &mut StreamPrinter, line: &str) {
        let (command, rest) = split_command(line);
        match command {
            "/help" => print_help(),
            "/login" => self.login(rest).await,
            "/register" => self.register(rest).await,
            "/whoami" => self.whoami().await,
            "/logout" => self.logout(),
            "/subject" => self.set_subject(rest),
            "/grade" => self.set_grade(rest),
            "/explain" => self.explain(rest).await,
            "/practice" => self.practice(rest).await,
            "/docs" => self.docs(rest).await,
            "/ask" => self.ask_document(rest).await,
            "/flashcards" => self.flashcards(lines, rest).await,
            "/voice" => self.voice(rest).await,
            "/progress" => self.progress().await,
            "/cancel" => self.session.cancel(),
            other if other.starts_with('/') => {
                println!("unknown command {other}; /help lists what I know");
            }
            _ => self.submit_chat(printer, line),
        }
    }

    fn submit_chat(&mut self, printer: &mut StreamPrinter, text: &str) {
        if self.session.is_streaming() {
            println!("(one answer at a time; /cancel stops the current one)");
            return;
        }
        let before = self.peek.snapshot().messages().len();
        self.session.submit(text);
        let snapshot = self.peek.snapshot();
        if snapshot.messages().len() == before {
            return;
        }
        if self.session.is_streaming() {
            printer.begin();
        } else if let Some(message) = snapshot.messages().last() {
            // The exchange settled before the first render, usually a refusal.
            println!("tutor: {}", message.content);
            print_followups(message);
        }
    }

    async fn login(&mut self, rest: &str) {
        let Some((email, password)) = split_pair(rest) else {
            println!("usage: /login <email> <password>");
            return;
        };
        let request = LoginRequest {
            email: email.to_string(),
            password: password.to_string(),
        };
        match self.backend.login(&request).await {
            Ok(auth) => self.sign_in(auth),
            Err(error) => println!("login failed: {error}"),
        }
    }

    async fn register(&mut self, rest: &str) {
        let parsed = split_pair(rest).and_then(|(username, tail)| {
            split_pair(tail).map(|(email, password)| (username, email, password))
        });
        let Some((username, email, password)) = parsed else {
            println!("usage: /register <username> <email> <password>");
            return;
        };
        let request = RegisterRequest {
            username: username.to_string(),
            email: email.to_string(),
            password: password.to_string(),
        };
        match self.backend.register(&request).await {
            Ok(auth) => self.sign_in(auth),
            Err(error) => println!("registration failed: {error}"),
        }
    }

    fn sign_in(&mut self, auth: AuthSession) {
        println!("signed in as {} 👋", auth.user.username);
        self.session.set_user(Some(auth.user.clone()));
        self.auth = Some(auth);
    }

    /// Re-validates the held token server-side, dropping it when stale.
    async fn whoami(&mut self) {
        let Some(auth) = self.auth.as_ref() else {
            println!("not signed in");
            return;
        };
        match self.backend.verify_token(&auth.token).await {
            Ok(user) => println!("signed in as {} <{}>", user.username, user.email),
            Err(error) => {
                println!("session check failed: {error}");
                self.auth = None;
                self.session.set_user(None);
            }
        }
    }

    fn logout(&mut self) {
        if self.auth.take().is_none() {
            println!("not signed in");
            return;
        }
        self.session.set_user(None);
        println!("signed out");
    }

    fn set_subject(&self, rest: &str) {
        if rest.is_empty() {
            println!(
                "subject: {} (math, science, english, history, programming, physics)",
                self.settings.settings().subject
            );
            return;
        }
        self.update_settings(|settings| settings.subject = rest.to_string());
    }

    fn set_grade(&self, rest: &str) {
        if rest.is_empty() {
            println!(
                "grade level: {} (Elementary, Middle School, High School, College)",
                self.settings.settings().grade_level
            );
            return;
        }
        self.update_settings(|settings| settings.grade_level = rest.to_string());
    }

    fn update_settings(&self, change: impl FnOnce(&mut Settings)) {
        let mut updated = (*self.settings.settings()).clone();
        change(&mut updated);
        match self.settings.update(updated) {
            Ok(()) => {
                let saved = self.settings.settings();
                println!(
                    "saved: subject {}, grade level {}",
                    saved.subject, saved.grade_level
                );
            }
            Err(error) => println!("could not save settings: {error}"),
        }
    }

    async fn explain(&self, rest: &str) {
        if rest.is_empty() {
            println!("usage: /explain <topic> [simple|medium|detailed]");
            return;
        }
        let (topic, detail_level) = match rest.rsplit_once(char::is_whitespace) {
            Some((head, last)) => match DetailLevel::parse(last) {
                Some(level) => (head.trim_end(), level),
                None => (rest, DetailLevel::default()),
            },
            None => (rest, DetailLevel::default()),
        };
        let request = ExplainRequest {
            topic: topic.to_string(),
            grade_level: self.settings.settings().grade_level.clone(),
            detail_level,
        };
        match self.backend.explain(&request).await {
            Ok(explanation) => {
                if !explanation.topic.is_empty() {
                    println!("📚 {}", explanation.topic);
                }
                println!("{}", explanation.explanation);
            }
            Err(error) => println!("explain failed: {error}"),
        }
    }

    async fn practice(&self, rest: &str) {
        if rest.is_empty() {
            println!("usage: /practice <topic> [easy|medium|hard] [count]");
            return;
        }
        let mut topic = rest;
        let mut num_questions = 5;
        if let Some((head, last)) = topic.rsplit_once(char::is_whitespace) {
            if let Ok(count) = last.parse::<u32>() {
                num_questions = count;
                topic = head.trim_end();
            }
        }
        let mut difficulty = Difficulty::default();
        if let Some((head, last)) = topic.rsplit_once(char::is_whitespace) {
            if let Some(parsed) = Difficulty::parse(last) {
                difficulty = parsed;
                topic = head.trim_end();
            }
        }
        let request = PracticeRequest {
            subject: self.settings.settings().subject.clone(),
            topic: topic.to_string(),
            difficulty,
            num_questions,
        };
        match self.backend.practice(&request).await {
            Ok(set) if set.questions.is_empty() => {
                println!("no questions came back; try another topic");
            }
            Ok(set) => {
                for (index, question) in set.questions.iter().enumerate() {
                    println!();
                    println!("Question {}: {}", index + 1, question.question);
                    for option in &question.options {
                        println!("   {option}");
                    }
                    for hint in &question.hints {
                        println!("   💡 {hint}");
                    }
                    println!("   ✅ Answer: {}", question.answer);
                    if !question.explanation.is_empty() {
                        println!("   📝 {}", question.explanation);
                    }
                }
            }
            Err(error) => println!("practice failed: {error}"),
        }
    }

    async fn docs(&self, rest: &str) {
        let (action, arg) = split_command(rest);
        match action {
            "" => self.list_documents().await,
            "upload" => self.upload_document(arg).await,
            "delete" => self.delete_document(arg).await,
            "summary" => self.summarize_document(arg).await,
            _ => println!("usage: /docs [upload <path> | delete <id> | summary <id>]"),
        }
    }

    async fn list_documents(&self) {
        match self.backend.documents().await {
            Ok(documents) if documents.is_empty() => println!("No documents uploaded yet"),
            Ok(documents) => {
                for document in &documents {
                    println!(
                        "  {}  {} ({} chunks, {} words)",
                        document.id, document.filename, document.num_chunks, document.total_words
                    );
                }
            }
            Err(error) => println!("could not load documents: {error}"),
        }
    }

    async fn upload_document(&self, arg: &str) {
        if arg.is_empty() {
            println!("usage: /docs upload <path>");
            return;
        }
        let path = Path::new(arg);
        let supported = path
            .extension()
            .and_then(|extension| extension.to_str())
            .is_some_and(|extension| {
                matches!(
                    extension.to_ascii_lowercase().as_str(),
                    "pdf" | "docx" | "txt"
                )
            });
        if !supported {
            println!("Unsupported file type. Please upload PDF, DOCX, or TXT files.");
            return;
        }
        let filename = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload.txt".to_string());
        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(error) => {
                println!("could not read {arg}: {error}");
                return;
            }
        };
        println!("Extracting text & creating embeddings…");
        match self.backend.upload_document(&filename, bytes).await {
            Ok(document) => println!(
                "uploaded {} ({} chunks, {} words), id {}",
                document.filename, document.num_chunks, document.total_words, document.id
            ),
            Err(error) => println!("upload failed: {error}"),
        }
    }

    async fn delete_document(&self, arg: &str) {
        if arg.is_empty() {
            println!("usage: /docs delete <id>");
            return;
        }
        match self.backend.delete_document(arg).await {
            Ok(()) => println!("deleted {arg}"),
            Err(error) => println!("could not delete: {error}"),
        }
    }

    async fn summarize_document(&self, arg: &str) {
        if arg.is_empty() {
            println!("usage: /docs summary <id>");
            return;
        }
        match self.backend.summarize_document(arg).await {
            Ok(summary) => println!("{}", summary.summary),
            Err(error) => println!("could not summarize: {error}"),
        }
    }

    async fn ask_document(&self, rest: &str) {
        let Some((id, question)) = split_pair(rest) else {
            println!("usage: /ask <doc-id> <question>");
            return;
        };
        match self.backend.query_document(id, question).await {
            Ok(answer) => {
                println!("{}", answer.answer);
                if !answer.sources.is_empty() {
                    println!("  📎 {} chunks used", answer.sources.len());
                }
            }
            Err(error) => println!("could not answer: {error}"),
        }
    }

    async fn flashcards(&self, lines: &mut InputLines, rest: &str) {
        let (id, count_raw) = split_command(rest);
        if id.is_empty() {
            println!("usage: /flashcards <doc-id> [count]");
            return;
        }
        let count = count_raw.parse::<u32>().unwrap_or(10);

        println!("Generating flashcards with AI…");
        let cards = match self.backend.document_flashcards(id, count).await {
            Ok(cards) => cards,
            Err(error) => {
                println!("could not generate flashcards: {error}");
                return;
            }
        };
        let Some(mut review) = ReviewSession::new(cards) else {
            println!("No flashcards could be generated from this document.");
            return;
        };

        while let Some(card) = review.current().cloned() {
            println!();
            println!(
                "card {} / {}   ✅ {} got it   🔁 {} retry",
                review.card_number(),
                review.deck_len(),
                review.got(),
                review.retried()
            );
            println!("Q: {}", card.front);
            let Some(reply) = read_reply(lines, "   [enter] reveal, [q] stop  ").await else {
                return;
            };
            if reply.eq_ignore_ascii_case("q") {
                println!("review stopped");
                return;
            }
            println!("A: {}", card.back);
            loop {
                let Some(reply) =
                    read_reply(lines, "   got it? [y] yes, [n] retry, [q] stop  ").await
                else {
                    return;
                };
                match reply.to_ascii_lowercase().as_str() {
                    "y" => {
                        review.grade(ReviewGrade::Got);
                        break;
                    }
                    "n" => {
                        review.grade(ReviewGrade::Retry);
                        break;
                    }
                    "q" => {
                        println!("review stopped");
                        return;
                    }
                    _ => {}
                }
            }
        }

        let report = review.report();
        let percent = report.score_percent().unwrap_or(0);
        println!();
        if percent >= 80 {
            println!("🎉 Great job!");
        } else {
            println!("💪 Keep practicing!");
        }
        println!(
            "You answered {} of {} cards correctly ({percent}%)",
            report.got,
            report.total()
        );
        self.log_flashcard_session(&report);
    }

    /// Completed reviews feed the progress tracker, same policy as chat:
    /// signed-in users only, fire-and-forget.
    fn log_flashcard_session(&self, report: &ReviewReport) {
        let Some(user) = self.session.user() else {
            return;
        };
        let mut record = ActivityRecord::new(
            user.id,
            ActivityKind::FlashcardSession,
            &self.settings.settings().subject,
        )
        .with_metadata(serde_json::json!({ "got": report.got, "total": report.total() }));
        if let Some(score) = report.score_percent() {
            record = record.with_score(score);
        }
        let backend = Arc::clone(&self.backend);
        tokio::spawn(async move {
            if let Err(error) = backend.log_activity(record).await {
                tracing::debug!(error = %error, "activity log failed, ignoring");
            }
        });
    }

    async fn voice(&self, rest: &str) {
        if rest.is_empty() {
            println!("usage: /voice <path-to-audio>");
            return;
        }
        let path = Path::new(rest);
        let filename = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "recording.webm".to_string());
        let audio = match std::fs::read(path) {
            Ok(audio) => audio,
            Err(error) => {
                println!("could not read {rest}: {error}");
                return;
            }
        };
        let settings = self.settings.settings();
        let request = VoiceTurnRequest {
            session_id: self.session.profile().session_id.clone(),
            subject: settings.subject.clone(),
            grade_level: settings.grade_level.clone(),
        };
        match self.backend.voice_chat(&request, &filename, audio).await {
            Ok(reply) => {
                println!("you said: {}", reply.user_text);
                println!("tutor: {}", reply.assistant_text);
                if let Some(audio_url) = reply.audio_url.as_deref() {
                    self.save_reply_audio(audio_url).await;
                }
            }
            Err(error) => println!("voice exchange failed: {error}"),
        }
    }

    async fn save_reply_audio(&self, audio_url: &str) {
        let bytes = match self.backend.fetch_voice_audio(audio_url).await {
            Ok(bytes) => bytes,
            Err(error) => {
                println!("could not fetch the reply audio: {error}");
                return;
            }
        };
        let name = audio_url
            .rsplit('/')
            .find(|segment| !segment.is_empty())
            .unwrap_or("reply-audio");
        let target = std::env::temp_dir().join(name);
        match std::fs::write(&target, bytes) {
            Ok(()) => println!("🔊 reply audio saved to {}", target.display()),
            Err(error) => println!("could not save the reply audio: {error}"),
        }
    }

    async fn progress(&self) {
        let Some(user) = self.session.user() else {
            println!("sign in first: /login <email> <password>");
            return;
        };
        match self.backend.progress_summary(user.id).await {
            Ok(summary) => print_progress(&summary),
            Err(error) => println!("could not load progress: {error}"),
        }
    }
}

/// Incremental console renderer for the message currently streaming in.
///
/// Keeps the last printed content; when the transcript grows it prints only
/// the new suffix, and when the content was replaced wholesale (a failure
/// display) it restarts the line.
#[derive(Default)]
struct StreamPrinter {
    printed: String,
    active: bool,
}

impl StreamPrinter {
    fn begin(&mut self) {
        self.printed.clear();
        self.active = true;
        print!("tutor: ");
        flush_stdout();
    }

    /// Returns true when the watched turn just closed.
    fn render(&mut self, transcript: &Transcript) -> bool {
        if !self.active {
            return false;
        }
        let Some(message) = transcript
            .messages()
            .iter()
            .rev()
            .find(|message| message.role == Role::Assistant)
        else {
            return false;
        };
        if let Some(suffix) = message.content.strip_prefix(self.printed.as_str()) {
            print!("{suffix}");
        } else {
            print!("\n{}", message.content);
        }
        flush_stdout();
        self.printed = message.content.clone();

        if message.is_open() {
            return false;
        }
        self.active = false;
        if message.status == MessageStatus::Cancelled {
            println!(" ⏹");
        } else {
            println!();
        }
        print_followups(message);
        true
    }
}

fn print_followups(message: &Message) {
    if !message.suggestions.is_empty() {
        println!(
            "💡 You might also want to: {}",
            message.suggestions.join(" | ")
        );
    }
    if !message.resources.is_empty() {
        println!("📚 Resources: {}", message.resources.join(" | "));
    }
}

fn print_progress(summary: &ProgressSummary) {
    let totals = &summary.totals;
    println!("📊 Your learning stats");
    println!("  💬 messages: {}", totals.messages);
    match totals.fc_accuracy {
        Some(accuracy) => println!(
            "  🃏 flashcard sessions: {} ({accuracy:.0}% accuracy)",
            totals.flashcard_sessions
        ),
        None => println!("  🃏 flashcard sessions: {}", totals.flashcard_sessions),
    }
    println!("  🎤 voice sessions: {}", totals.voice_sessions);
    println!("  📖 explanations: {}", totals.explanations);
    match totals.avg_quiz_score {
        Some(score) => println!(
            "  ✏️ quiz attempts: {} ({score:.0}% average)",
            totals.quiz_attempts
        ),
        None => println!("  ✏️ quiz attempts: {}", totals.quiz_attempts),
    }
    println!("  🔥 streak: {} days", totals.streak);

    if !summary.week_activity.is_empty() {
        let peak = summary
            .week_activity
            .iter()
            .map(|day| day.count)
            .max()
            .unwrap_or(0)
            .max(1);
        println!("This week:");
        for day in &summary.week_activity {
            let bar = "▇".repeat(((day.count * 20) / peak) as usize);
            println!("  {:<4} {:<20} {}", day.day, bar, day.count);
        }
    }

    if !summary.subject_breakdown.is_empty() {
        println!("Subjects:");
        for subject in &summary.subject_breakdown {
            println!("  {:<14} {}", subject.subject, subject.count);
        }
    }

    if !summary.recent_activity.is_empty() {
        println!("Recent:");
        for entry in &summary.recent_activity {
            let mut line = format!("  {}  {}", activity_label(&entry.kind), entry.subject);
            if let Some(score) = entry.score {
                line.push_str(&format!("  {score:.0}%"));
            }
            if !entry.timestamp.is_empty() {
                line.push_str(&format!("  {}", entry.timestamp));
            }
            println!("{line}");
        }
    }
}

fn activity_label(kind: &str) -> &str {
    match kind {
        "chat_message" => "💬 Chat Message",
        "flashcard_session" => "🃏 Flashcard Session",
        "quiz_attempt" => "✏️ Quiz Attempt",
        "voice_session" => "🎤 Voice Session",
        "explanation" => "📖 Explanation",
        other => other,
    }
}

fn print_welcome(settings: &Settings) {
    println!(
        "👋 Hi! I'm your AI tutor. Ask me anything about {}.",
        settings.subject
    );
    println!("Commands start with /; /help lists them, /quit leaves.");
}

fn print_help() {
    println!("  /login <email> <password>          sign in");
    println!("  /register <username> <email> <password>");
    println!("  /whoami                            check the signed-in account");
    println!("  /logout");
    println!("  /subject [name]                    show or change the subject");
    println!("  /grade [level]                     show or change the grade level");
    println!("  /explain <topic> [simple|medium|detailed]");
    println!("  /practice <topic> [easy|medium|hard] [count]");
    println!("  /docs                              list uploaded documents");
    println!("  /docs upload <path>                upload a PDF, DOCX, or TXT file");
    println!("  /docs delete <id>");
    println!("  /docs summary <id>");
    println!("  /ask <doc-id> <question>           ask about a document");
    println!("  /flashcards <doc-id> [count]       review generated flashcards");
    println!("  /voice <path>                      send a recorded clip");
    println!("  /progress                          show your learning stats");
    println!("  /cancel                            stop the current answer");
    println!("  /quit");
    println!("Anything else is sent straight to the tutor.");
}

async fn read_reply(lines: &mut InputLines, prompt_text: &str) -> Option<String> {
    print!("{prompt_text}");
    flush_stdout();
    match lines.next_line().await {
        Ok(Some(line)) => Some(line.trim().to_string()),
        Ok(None) => None,
        Err(error) => {
            tracing::warn!(error = %error, "standard input closed unexpectedly");
            None
        }
    }
}

fn prompt() {
    print!("you: ");
    flush_stdout();
}

fn flush_stdout() {
    let _ = std::io::stdout().flush();
}

fn split_command(line: &str) -> (&str, &str) {
    match line.split_once(char::is_whitespace) {
        Some((head, tail)) => (head, tail.trim()),
        None => (line, ""),
    }
}

fn split_pair(rest: &str) -> Option<(&str, &str)> {
    match split_command(rest) {
        (first, second) if !first.is_empty() && !second.is_empty() => Some((first, second)),
        _ => None,
    }
}
