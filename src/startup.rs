use actix_web::dev::Server;
use actix_web::{web, App, HttpServer};
use std::net::TcpListener;

use crate::auth::AuthService;
use crate::logger::LoggerMiddleware;
use crate::middleware::AuthMiddleware;
use crate::routes::{
    activate, current_account, deactivate, health_check, login, logout, logout_all, refresh,
    register, revoke_sessions,
};

pub fn run(listener: TcpListener, auth: web::Data<AuthService>) -> Result<Server, std::io::Error> {
    let server = HttpServer::new(move || {
        App::new()
            .wrap(LoggerMiddleware)
            .app_data(auth.clone())
            // Public routes
            .route("/health_check", web::get().to(health_check))
            .route("/auth/register", web::post().to(register))
            .route("/auth/login", web::post().to(login))
            .route("/auth/refresh", web::post().to(refresh))
            .route("/auth/logout", web::post().to(logout))
            // Protected routes (bearer access token)
            .service(
                web::scope("/api")
                    .wrap(AuthMiddleware::new(auth.clone()))
                    .route("/me", web::get().to(current_account))
                    .route("/logout-all", web::post().to(logout_all))
                    .service(
                        web::scope("/admin/accounts/{id}")
                            .route("/revoke-sessions", web::post().to(revoke_sessions))
                            .route("/deactivate", web::post().to(deactivate))
                            .route("/activate", web::post().to(activate)),
                    ),
            )
    })
    .listen(listener)?
    .run();

    Ok(server)
}
