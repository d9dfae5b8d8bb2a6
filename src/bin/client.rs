use std::time::Instant;

use clap::{Parser, Subcommand};
use num_bigint::BigUint;
use tonic::Request;
use zkp_auth::proof::prover::Prover;
use zkp_auth::proto::auth_client::AuthClient;
use zkp_auth::proto::{
    AuthenticationAnswerRequest, AuthenticationChallengeRequest, RegisterRequest, SessionRequest,
};
use zkp_auth::ChaumPedersen;

#[derive(Parser)]
#[command(name = "zkp-auth-client")]
#[command(about = "Chaum-Pedersen passwordless authentication client", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://127.0.0.1:50051")]
    server: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Enroll a user with a key derived from their password
    Register {
        #[arg(short, long)]
        user: String,

        #[arg(short, long)]
        password: String,
    },

    /// Prove knowledge of the password and obtain a session id
    Login {
        #[arg(short, long)]
        user: String,

        #[arg(short, long)]
        password: String,
    },

    /// Check that a session is still live
    Session {
        #[arg(long)]
        id: String,
    },

    /// End a session
    Logout {
        #[arg(long)]
        id: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut client = AuthClient::connect(cli.server.clone()).await?;
    let engine = ChaumPedersen::rfc5114();

    match cli.command {
        Commands::Register { user, password } => {
            println!("Registering user '{user}'...");

            let prover = Prover::from_password(&engine, &user, &password)?;
            let key = prover.public_key();

            let request = Request::new(RegisterRequest {
                user: user.clone(),
                y1: key.y1.to_bytes_be(),
                y2: key.y2.to_bytes_be(),
            });

            match client.register(request).await {
                Ok(_) => println!("Success: user '{user}' registered"),
                Err(status) => {
                    eprintln!("Failed: {}", status.message());
                    std::process::exit(1);
                }
            }
        }

        Commands::Login { user, password } => {
            println!("Authenticating user '{user}'...");
            let start = Instant::now();

            let prover = Prover::from_password(&engine, &user, &password)?;
            let commitment = prover.commit();

            let request = Request::new(AuthenticationChallengeRequest {
                user: user.clone(),
                r1: commitment.r1.to_bytes_be(),
                r2: commitment.r2.to_bytes_be(),
            });

            let challenge = match client.create_authentication_challenge(request).await {
                Ok(response) => response.into_inner(),
                Err(status) => {
                    eprintln!("Failed: {}", status.message());
                    std::process::exit(1);
                }
            };

            let c = BigUint::from_bytes_be(&challenge.c);
            let s = prover.respond(&commitment, &c);

            let request = Request::new(AuthenticationAnswerRequest {
                auth_id: challenge.auth_id,
                s: s.to_bytes_be(),
            });

            match client.verify_authentication(request).await {
                Ok(response) => {
                    println!("Success: authenticated in {:?}", start.elapsed());
                    println!("Session id: {}", response.into_inner().session_id);
                }
                Err(status) => {
                    eprintln!("Authentication failed: {}", status.message());
                    std::process::exit(1);
                }
            }
        }

        Commands::Session { id } => {
            let request = Request::new(SessionRequest { session_id: id });

            match client.validate_session(request).await {
                Ok(response) => {
                    let session = response.into_inner();
                    let expires = chrono::DateTime::from_timestamp(session.expires_at, 0)
                        .map(|t| t.to_rfc3339())
                        .unwrap_or_else(|| session.expires_at.to_string());
                    println!("Session valid for '{}', expires at {expires}", session.user);
                }
                Err(status) => {
                    eprintln!("Session invalid: {}", status.message());
                    std::process::exit(1);
                }
            }
        }

        Commands::Logout { id } => {
            client
                .logout(Request::new(SessionRequest { session_id: id }))
                .await?;
            println!("Logged out");
        }
    }

    Ok(())
}
