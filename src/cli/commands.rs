use chrono::{DateTime, Utc};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::{
    app::{errors::AppError, service::AppService},
    cards::{parse_tags, Card, CardCreate, CardUpdate, DeckCreate, DeckUpdate},
    cli::{
        errors::{CliError, CliResult},
        validation::*,
        CardArgs, CardFields, Command, DeckArgs,
    },
    eid::Eid,
    semantic::{EmbeddingError, SearchError, SearchScope},
    sync::SyncError,
};

/// Card as printed on the command line; the vector itself is noise.
#[derive(Debug, Serialize)]
struct CardView {
    id: String,
    deck_id: String,
    front_title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    front_custom_json: Option<String>,
    back_content: String,
    back_format: String,
    tags: Vec<String>,
    favorite: bool,
    embedded: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    score: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    front: Option<String>,
}

impl From<Card> for CardView {
    fn from(card: Card) -> Self {
        CardView {
            id: card.id.to_string(),
            deck_id: card.deck_id.to_string(),
            front_title: card.front_title,
            front_custom_json: card.front_custom_json,
            back_content: card.back_content,
            back_format: card.back_format,
            tags: card.tags,
            favorite: card.favorite,
            embedded: card.content_embedding.is_some(),
            created_at: card.created_at,
            updated_at: card.updated_at,
            score: None,
            front: None,
        }
    }
}

pub async fn run(command: Command, app: &AppService, cancel: CancellationToken) -> CliResult<()> {
    match command {
        Command::Deck { action } => deck(action, app),
        Command::Card { action } => card(action, app),
        Command::Search {
            query,
            deck,
            limit,
            threshold,
        } => search(app, &query, deck.as_deref(), limit, threshold).await,
        Command::Reembed { deck } => reembed(app, deck.as_deref()).await,
        Command::Export { deck, location } => export(app, &deck, &location, cancel).await,
        Command::Import { location, deck, yes } => import(app, &location, deck.as_deref(), yes, cancel).await,
        Command::Status { deck } => status(app, &deck),
    }
}

fn print_json<T: Serialize>(value: &T) -> CliResult<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn confirm(message: &str) -> CliResult<bool> {
    Ok(inquire::Confirm::new(message).with_default(false).prompt()?)
}

fn deck(action: DeckArgs, app: &AppService) -> CliResult<()> {
    match action {
        DeckArgs::Add {
            name,
            description,
            artwork_url,
            public,
        } => {
            validate_deck_name(&name)?;
            let deck = app.create_deck(DeckCreate {
                name,
                description,
                artwork_url,
                is_public: public,
            })?;
            print_json(&deck)
        }
        DeckArgs::List {} => print_json(&app.decks()),
        DeckArgs::Edit {
            deck,
            name,
            description,
            artwork_url,
            public,
        } => {
            if let Some(name) = &name {
                validate_deck_name(name)?;
            }
            let deck = app.resolve_deck(&deck)?;
            let deck = app.update_deck(
                &deck.id,
                DeckUpdate {
                    name,
                    description,
                    artwork_url,
                    is_public: public,
                },
            )?;
            print_json(&deck)
        }
        DeckArgs::Delete { deck, yes } => {
            let deck = app.resolve_deck(&deck)?;
            let count = app.cards(Some(&deck.id)).len();

            if !yes && !confirm(&format!("Delete deck '{}' and its {count} cards?", deck.name))? {
                return Err(CliError::UserCancelled);
            }

            app.delete_deck(&deck.id)?;
            println!("deleted deck {}", deck.id);
            Ok(())
        }
    }
}

fn validate_fields(fields: &CardFields) -> CliResult<()> {
    if let Some(title) = &fields.title {
        validate_title(title)?;
    }
    if let Some(tags) = &fields.tags {
        validate_tags(tags)?;
    }
    Ok(())
}

fn card(action: CardArgs, app: &AppService) -> CliResult<()> {
    match action {
        CardArgs::Add { deck, fields } => {
            validate_fields(&fields)?;
            let deck = app.resolve_deck(&deck)?;
            let card = app.create_card(CardCreate {
                deck_id: deck.id,
                front_title: fields.title,
                front_custom_json: fields.front_json,
                back_content: fields.back,
                back_format: fields.format,
                tags: fields.tags.as_deref().map(parse_tags),
                favorite: fields.favorite.unwrap_or(false),
            })?;
            print_json(&CardView::from(card))
        }
        CardArgs::List { deck } => {
            let deck_id = match deck {
                Some(deck) => Some(app.resolve_deck(&deck)?.id),
                None => None,
            };
            let cards: Vec<CardView> = app.cards(deck_id.as_ref()).into_iter().map(CardView::from).collect();
            print_json(&cards)
        }
        CardArgs::Show { id } => {
            let card = app.card(&Eid::from(id))?;
            let front = app.render_front(&card)?;
            let mut view = CardView::from(card);
            view.front = Some(front);
            print_json(&view)
        }
        CardArgs::Edit { id, deck, fields } => {
            validate_fields(&fields)?;
            let deck_id = match deck {
                Some(deck) => Some(app.resolve_deck(&deck)?.id),
                None => None,
            };
            let card = app.update_card(
                &Eid::from(id),
                CardUpdate {
                    deck_id,
                    front_title: fields.title,
                    front_custom_json: fields.front_json,
                    back_content: fields.back,
                    back_format: fields.format,
                    tags: fields.tags.as_deref().map(parse_tags),
                    favorite: fields.favorite,
                },
            )?;
            print_json(&CardView::from(card))
        }
        CardArgs::Duplicate { id } => {
            let card = app.duplicate_card(&Eid::from(id))?;
            print_json(&CardView::from(card))
        }
        CardArgs::Delete { id } => {
            let id = Eid::from(id);
            app.delete_card(&id)?;
            println!("deleted card {id}");
            Ok(())
        }
    }
}

fn scope_of(app: &AppService, deck: Option<&str>) -> CliResult<SearchScope> {
    Ok(match deck {
        Some(deck) => SearchScope::Deck(app.resolve_deck(deck)?.id),
        None => SearchScope::All,
    })
}

fn is_model_unavailable(err: &AppError) -> bool {
    matches!(
        err,
        AppError::Search(SearchError::Embedding(EmbeddingError::ModelUnavailable(_)))
    )
}

async fn search(
    app: &AppService,
    query: &str,
    deck: Option<&str>,
    limit: Option<usize>,
    threshold: Option<f32>,
) -> CliResult<()> {
    if let Some(limit) = limit {
        validate_limit(limit)?;
    }
    if let Some(threshold) = threshold {
        validate_threshold(threshold)?;
    }
    let scope = scope_of(app, deck)?;

    let results = loop {
        match app.search(query, &scope, limit, threshold).await {
            Ok(results) => break results,
            Err(err) if is_model_unavailable(&err) => {
                eprintln!("{err}");
                if !confirm("Retry loading the embedding model?")? {
                    return Err(err.into());
                }
                app.retry_model();
            }
            Err(err) => return Err(err.into()),
        }
    };

    let views: Vec<CardView> = results
        .into_iter()
        .map(|(card, score)| {
            let mut view = CardView::from(card);
            view.score = Some(score);
            view
        })
        .collect();
    print_json(&views)
}

async fn reembed(app: &AppService, deck: Option<&str>) -> CliResult<()> {
    let scope = scope_of(app, deck)?;

    let bar = ProgressBar::new(0);
    bar.set_style(
        ProgressStyle::with_template("{spinner} [{bar:40}] {pos}/{len} cards ({eta})")
            .map_err(|err| CliError::internal(err.to_string()))?
            .progress_chars("=> "),
    );

    let result = app
        .reembed(&scope, |done, total| {
            bar.set_length(total as u64);
            bar.set_position(done as u64);
        })
        .await;
    bar.finish_and_clear();

    let result = result?;
    println!(
        "{} embedded, {} up to date, {} failed",
        result.embedded, result.skipped, result.failed
    );
    Ok(())
}

/// Failures a user may want to retry right away.
fn is_retryable(err: &AppError) -> bool {
    matches!(
        err,
        AppError::Sync(
            SyncError::RemoteUnreachable(_) | SyncError::RemoteTimeout(_) | SyncError::CancelledAfterPartialWrite(_)
        )
    )
}

async fn export(app: &AppService, deck: &str, location: &str, cancel: CancellationToken) -> CliResult<()> {
    validate_location(location)?;
    let deck = app.resolve_deck(deck)?;

    let report = loop {
        match app.export(&deck.id, location, cancel.clone()).await {
            Ok(report) => break report,
            Err(err) if is_retryable(&err) && !cancel.is_cancelled() => {
                eprintln!("{err}");
                if !confirm("Retry export?")? {
                    return Err(err.into());
                }
            }
            Err(err) => return Err(err.into()),
        }
    };

    println!("exported {} cards of '{}' to {}", report.cards, deck.name, report.location);
    Ok(())
}

async fn import(
    app: &AppService,
    location: &str,
    deck: Option<&str>,
    yes: bool,
    cancel: CancellationToken,
) -> CliResult<()> {
    validate_location(location)?;

    let deck_id = match deck {
        Some(deck) => {
            let deck = app.resolve_deck(deck)?;
            let status = app.sync_status(&deck.id)?;
            let count = app.cards(Some(&deck.id)).len();

            if let Some(warning) = &status.warning {
                eprintln!("warning: {warning}");
            }
            if !yes
                && count > 0
                && !confirm(&format!(
                    "Replace the {count} cards of '{}' with the contents of {location}?",
                    deck.name
                ))?
            {
                return Err(CliError::UserCancelled);
            }
            deck.id
        }
        None => Eid::new(),
    };

    let report = loop {
        match app.import(&deck_id, location, cancel.clone()).await {
            Ok(report) => break report,
            Err(err) if is_retryable(&err) && !cancel.is_cancelled() => {
                eprintln!("{err}");
                if !confirm("Retry import?")? {
                    return Err(err.into());
                }
            }
            Err(err) => return Err(err.into()),
        }
    };

    println!("imported {} cards into deck {}", report.cards, report.deck_id);
    Ok(())
}

#[derive(Debug, Serialize)]
struct StatusView {
    deck_id: String,
    state: String,
    remote_location: Option<String>,
    last_exported_at: Option<DateTime<Utc>>,
    last_imported_at: Option<DateTime<Utc>>,
    last_synced_at: Option<DateTime<Utc>>,
    local_changes: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    warning: Option<String>,
}

fn status(app: &AppService, deck: &str) -> CliResult<()> {
    let deck = app.resolve_deck(deck)?;
    let status = app.sync_status(&deck.id)?;
    let manifest = status.manifest.as_ref();

    print_json(&StatusView {
        deck_id: status.deck_id.to_string(),
        state: status.state.to_string(),
        remote_location: manifest.and_then(|m| m.remote_location.clone()),
        last_exported_at: manifest.and_then(|m| m.last_exported_at),
        last_imported_at: manifest.and_then(|m| m.last_imported_at),
        last_synced_at: manifest.and_then(|m| m.last_synced_at()),
        local_changes: status.local_changes,
        warning: status.warning,
    })?;

    if manifest.is_some() {
        eprintln!("note: sync is one-directional; an import replaces local cards and an export replaces the remote copy");
    }
    Ok(())
}
