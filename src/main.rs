use std::{process, sync::Arc};

use quill::{
    application::{
        error::AppError,
        feed::FeedService,
        follow::FollowService,
        posts::PostService,
        repos::{
            CommentsRepo, CreateGroupParams, FollowsRepo, GroupsRepo, HealthProbe, PostsRepo,
            PostsWriteRepo, RepoError, UsersRepo,
        },
    },
    cache::{OutputCacheConfig, OutputCacheState},
    config::{self, CreateGroupArgs, GroupsCommand},
    domain::slug::{generate_unique_slug_async, validate_slug},
    infra::{
        db::PostgresRepositories,
        error::InfraError,
        http::{self, AdminState, HttpState},
        telemetry,
        uploads::UploadStorage,
    },
};
use tokio::{signal, try_join};
use tracing::{Dispatch, Level, dispatcher, error, info};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()
        .map_err(|err| AppError::unexpected(format!("failed to load configuration: {err}")))?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    telemetry::init(&settings.logging).map_err(AppError::from)?;

    match command {
        config::Command::Serve(_) => run_serve(settings).await,
        config::Command::Migrate(_) => run_migrate(settings).await,
        config::Command::Groups(args) => match args.command {
            GroupsCommand::Create(create) => run_create_group(settings, create).await,
        },
    }
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let repositories = init_repositories(&settings).await?;
    let (http_state, admin_state) = build_application_context(repositories, &settings)?;
    serve_http(&settings, http_state, admin_state).await
}

async fn run_migrate(settings: config::Settings) -> Result<(), AppError> {
    init_repositories(&settings).await?;
    info!(target = "quill::migrate", "database schema is up to date");
    Ok(())
}

async fn run_create_group(
    settings: config::Settings,
    args: CreateGroupArgs,
) -> Result<(), AppError> {
    let repositories = init_repositories(&settings).await?;

    let slug = match args.slug {
        Some(slug) => {
            let slug = slug.trim().to_string();
            validate_slug(&slug).map_err(|err| AppError::validation(err.to_string()))?;
            slug
        }
        None => generate_unique_slug_async(&args.title, |candidate| {
            let repositories = repositories.clone();
            let candidate = candidate.to_string();
            async move {
                let existing = repositories.find_group_by_slug(&candidate).await?;
                Ok::<bool, RepoError>(existing.is_none())
            }
        })
        .await
        .map_err(|err| AppError::validation(err.to_string()))?,
    };

    let group = repositories
        .create_group(CreateGroupParams {
            title: args.title.trim().to_string(),
            slug,
            description: args.description.trim().to_string(),
        })
        .await
        .map_err(|err| match err {
            RepoError::Duplicate { .. } => {
                AppError::validation("a group with this slug already exists")
            }
            other => AppError::from(InfraError::database(other.to_string())),
        })?;

    info!(
        target = "quill::groups",
        group_id = %group.id,
        slug = %group.slug,
        "group created"
    );
    Ok(())
}

async fn init_repositories(
    settings: &config::Settings,
) -> Result<Arc<PostgresRepositories>, AppError> {
    let database_url = settings
        .database
        .url
        .as_ref()
        .ok_or_else(|| InfraError::configuration("database url is not configured"))
        .map_err(AppError::from)?;

    let pool =
        PostgresRepositories::connect(database_url, settings.database.max_connections.get())
            .await
            .map_err(|err| AppError::from(InfraError::database(err.to_string())))?;

    PostgresRepositories::run_migrations(&pool)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;

    Ok(Arc::new(PostgresRepositories::new(pool)))
}

fn build_application_context(
    repositories: Arc<PostgresRepositories>,
    settings: &config::Settings,
) -> Result<(HttpState, AdminState), AppError> {
    let posts_repo: Arc<dyn PostsRepo> = repositories.clone();
    let posts_write_repo: Arc<dyn PostsWriteRepo> = repositories.clone();
    let groups_repo: Arc<dyn GroupsRepo> = repositories.clone();
    let users_repo: Arc<dyn UsersRepo> = repositories.clone();
    let comments_repo: Arc<dyn CommentsRepo> = repositories.clone();
    let follows_repo: Arc<dyn FollowsRepo> = repositories.clone();
    let health: Arc<dyn HealthProbe> = repositories;

    let upload_storage = Arc::new(
        UploadStorage::new(settings.uploads.directory.clone())
            .map_err(|err| AppError::from(InfraError::from(err)))?,
    );
    let upload_limit_bytes = usize::try_from(settings.uploads.max_request_bytes.get())
        .map_err(|_| AppError::from(InfraError::configuration("upload limit exceeds usize")))?;

    let follows = Arc::new(FollowService::new(users_repo.clone(), follows_repo));
    let feed = Arc::new(FeedService::new(
        posts_repo.clone(),
        groups_repo.clone(),
        users_repo.clone(),
        follows.clone(),
        settings.feed.page_size,
    ));
    let posts = Arc::new(PostService::new(
        posts_repo,
        posts_write_repo,
        groups_repo,
        comments_repo,
        upload_storage.clone(),
    ));

    let cache = settings
        .cache
        .enabled
        .then(|| OutputCacheState::in_memory(OutputCacheConfig::from(&settings.cache)));

    let http_state = HttpState {
        feed,
        posts,
        follows,
        users: users_repo,
        health: health.clone(),
        upload_storage,
        auth: settings.auth.clone(),
        cache: cache.clone(),
        upload_limit_bytes,
    };
    let admin_state = AdminState { cache, health };

    Ok((http_state, admin_state))
}

async fn serve_http(
    settings: &config::Settings,
    http_state: HttpState,
    admin_state: AdminState,
) -> Result<(), AppError> {
    let public_router = http::build_router(http_state);
    let admin_router = http::build_admin_router(admin_state);

    let public_listener = tokio::net::TcpListener::bind(settings.server.public_addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;
    let admin_listener = tokio::net::TcpListener::bind(settings.server.admin_addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;

    info!(
        target = "quill::serve",
        public = %settings.server.public_addr,
        admin = %settings.server.admin_addr,
        "listeners bound"
    );

    let public_server = axum::serve(public_listener, public_router.into_make_service())
        .with_graceful_shutdown(shutdown_signal());
    let admin_server = axum::serve(admin_listener, admin_router.into_make_service())
        .with_graceful_shutdown(shutdown_signal());

    try_join!(public_server, admin_server)
        .map_err(|err| AppError::unexpected(format!("server error: {err}")))?;

    info!(target = "quill::serve", "listeners stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = signal::ctrl_c().await {
        error!(target = "quill::serve", error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
