use comms::{
    msg::{Command, Msg, Payload},
    specs::{ContributionsIns, ContributionsRes, Parameters, Status},
};
use tokio::{
    io,
    net::{TcpListener, TcpStream},
};

#[tokio::test]
async fn request_reply_over_tcp() -> io::Result<()> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;

    let coordinator = tokio::spawn(async move {
        let stream = TcpStream::connect(addr).await?;
        let (rx, tx) = stream.into_split();
        let (mut rx, mut tx) = comms::channel(rx, tx);

        let Msg::Control(Command::GetContributions(ins)) = rx.recv().await? else {
            panic!("expected a contributions request");
        };

        let scores = ins.gradients.iter().map(|g| g.tensors.len() as f64).collect();
        let res = ContributionsRes {
            status: Status::ok(),
            scores,
        };
        tx.send(&Msg::Data(Payload::Contributions(res))).await
    });

    let (stream, _) = listener.accept().await?;
    let (rx, tx) = stream.into_split();
    let (mut rx, mut tx) = comms::channel(rx, tx);

    let gradients = vec![
        Parameters::from_f32(&[vec![1.0]]),
        Parameters::from_f32(&[vec![1.0], vec![2.0]]),
    ];
    tx.send(&Msg::Control(Command::GetContributions(ContributionsIns { gradients })))
        .await?;

    let Msg::Data(Payload::Contributions(res)) = rx.recv().await? else {
        panic!("expected contributions");
    };

    assert!(res.status.is_ok());
    assert_eq!(res.scores, vec![1.0, 2.0]);
    coordinator.await?
}

#[tokio::test]
async fn closed_connection_is_an_error() -> io::Result<()> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;

    let client = TcpStream::connect(addr).await?;
    let (stream, _) = listener.accept().await?;
    drop(client);

    let (rx, tx) = stream.into_split();
    let (mut rx, _tx) = comms::channel(rx, tx);

    let err = rx.recv::<Msg>().await.unwrap_err();
    assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    Ok(())
}
