use clap::Parser;
use log::{error, info};
use server::config::{RoomMode, ServerConfig};
use server::network::ServerHandle;
use shared::{WireFormat, DEFAULT_PORT};

/// Room allocation policy selectable from the command line.
#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum RoomModeArg {
    Single,
    Public,
    Private,
}

#[derive(Parser, Debug)]
#[clap(author, version, about = "Arcade party coordination server")]
struct Args {
    /// Address to bind to
    #[clap(short = 'H', long, default_value = "0.0.0.0")]
    host: String,

    /// Port to listen on
    #[clap(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// How players are grouped into rooms
    #[clap(long, value_enum, default_value = "single")]
    rooms: RoomModeArg,

    /// Players per room in public mode
    #[clap(long, default_value = "4", value_parser = parse_room_size)]
    room_size: usize,

    /// Maximum concurrent rooms in public mode
    #[clap(long, default_value = "10")]
    max_rooms: usize,

    /// Framing used on every connection (binary or json)
    #[clap(long, default_value = "binary")]
    wire_format: WireFormat,

    /// Delay between a round being decided and its scores being final
    #[clap(long, default_value = "5000")]
    final_score_ms: u64,

    /// Remove players silent for this long
    #[clap(long, default_value = "60000")]
    inactive_timeout_ms: u64,

    /// Offer games still in beta
    #[clap(long)]
    beta_games: bool,

    /// Ignore score updates lower than a player's current score
    #[clap(long)]
    monotonic_scores: bool,
}

fn parse_room_size(value: &str) -> Result<usize, String> {
    match value.parse::<usize>() {
        Ok(0) => Err("room size must be at least 1".to_string()),
        Ok(size) => Ok(size),
        Err(e) => Err(e.to_string()),
    }
}

impl Args {
    fn into_config(self) -> ServerConfig {
        let rooms = match self.rooms {
            RoomModeArg::Single => RoomMode::SingleRoom,
            RoomModeArg::Public => RoomMode::PublicRandomRooms {
                room_size: self.room_size,
                max_rooms: self.max_rooms,
            },
            RoomModeArg::Private => RoomMode::MultiplePrivateRooms,
        };

        ServerConfig {
            host: self.host,
            port: self.port,
            rooms,
            final_score_duration_millis: self.final_score_ms,
            inactive_player_timeout_millis: self.inactive_timeout_ms,
            include_beta_games: self.beta_games,
            wire_format: self.wire_format,
            enforce_monotonic_scores: self.monotonic_scores,
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = Args::parse().into_config();
    let mut server = ServerHandle::spawn(config).await?;
    info!("Ready on {}", server.local_addr());

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for Ctrl+C: {}", e);
    }

    info!("Received Ctrl+C, shutting down gracefully...");
    server.stop().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_map_to_public_rooms() {
        let args = Args::parse_from([
            "server",
            "--rooms",
            "public",
            "--room-size",
            "3",
            "--wire-format",
            "json",
        ]);
        let config = args.into_config();

        assert_eq!(
            config.rooms,
            RoomMode::PublicRandomRooms {
                room_size: 3,
                max_rooms: 10
            }
        );
        assert_eq!(config.wire_format, WireFormat::Json);
        assert_eq!(config.port, DEFAULT_PORT);
    }

    #[test]
    fn test_zero_room_size_is_rejected() {
        assert!(Args::try_parse_from(["server", "--room-size", "0"]).is_err());
        assert!(Args::try_parse_from(["server", "--room-size", "1"]).is_ok());
    }

    #[test]
    fn test_default_args() {
        let config = Args::parse_from(["server"]).into_config();
        assert_eq!(config.rooms, RoomMode::SingleRoom);
        assert!(!config.include_beta_games);
    }
}
