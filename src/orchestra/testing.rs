use std::{
    io,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use comms::specs::{
    Code, ContributionsIns, ContributionsRes, DisconnectRes, EvaluateIns, EvaluateRes, FitIns,
    FitRes, GetParametersIns, GetParametersRes, GradientsRes, IdentifyRes, Parameters,
    ReconnectIns, Role, Status,
};

use crate::orchestra::worker::{Worker, WorkerId};

/// How a fake coordinator answers contribution requests.
#[derive(Clone)]
pub enum Scoring {
    /// Always answers the same scores.
    Fixed(Vec<f64>),
    /// Scores every vector with its first value.
    FirstValue,
    /// Fails the call.
    Unreachable,
}

/// An in-process worker with scripted behavior.
pub struct FakeWorker {
    id: WorkerId,
    role: Role,
    scoring: Scoring,
    fit_code: Code,
    fail_fit: bool,
    fail_gradients: bool,
    panic_on_fit: bool,
    delay: Duration,
    gradient: Vec<f32>,
    tracking: Option<(Arc<AtomicUsize>, Arc<AtomicUsize>)>,
}

impl FakeWorker {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: WorkerId::new(id),
            role: Role::Participant,
            scoring: Scoring::Unreachable,
            fit_code: Code::Ok,
            fail_fit: false,
            fail_gradients: false,
            panic_on_fit: false,
            delay: Duration::ZERO,
            gradient: vec![0.0],
            tracking: None,
        }
    }

    pub fn coordinator(mut self, scoring: Scoring) -> Self {
        self.role = Role::Coordinator;
        self.scoring = scoring;
        self
    }

    pub fn failing_fit(mut self) -> Self {
        self.fail_fit = true;
        self
    }

    pub fn failing_gradients(mut self) -> Self {
        self.fail_gradients = true;
        self
    }

    pub fn panicking(mut self) -> Self {
        self.panic_on_fit = true;
        self
    }

    pub fn with_fit_code(mut self, code: Code) -> Self {
        self.fit_code = code;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_gradient(mut self, gradient: Vec<f32>) -> Self {
        self.gradient = gradient;
        self
    }

    pub fn tracking(mut self, running: Arc<AtomicUsize>, peak: Arc<AtomicUsize>) -> Self {
        self.tracking = Some((running, peak));
        self
    }

    fn status(code: Code) -> Status {
        match code {
            Code::Ok => Status::ok(),
            code => Status::failed(code, "scripted failure"),
        }
    }
}

#[async_trait]
impl Worker for FakeWorker {
    fn id(&self) -> &WorkerId {
        &self.id
    }

    async fn fit(&self, ins: FitIns, _: Option<Duration>) -> io::Result<FitRes> {
        if let Some((running, peak)) = &self.tracking {
            let now = running.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
        }

        tokio::time::sleep(self.delay).await;

        if let Some((running, _)) = &self.tracking {
            running.fetch_sub(1, Ordering::SeqCst);
        }

        if self.panic_on_fit {
            panic!("scripted panic");
        }

        if self.fail_fit {
            return Err(io::Error::new(io::ErrorKind::ConnectionReset, "scripted"));
        }

        Ok(FitRes {
            status: Self::status(self.fit_code),
            parameters: ins.parameters,
            num_examples: 1,
            metrics: Default::default(),
        })
    }

    async fn evaluate(&self, _: EvaluateIns, _: Option<Duration>) -> io::Result<EvaluateRes> {
        Ok(EvaluateRes {
            status: Status::ok(),
            loss: 0.5,
            num_examples: 1,
            metrics: Default::default(),
        })
    }

    async fn get_parameters(
        &self,
        _: GetParametersIns,
        _: Option<Duration>,
    ) -> io::Result<GetParametersRes> {
        Ok(GetParametersRes {
            status: Status::ok(),
            parameters: Parameters::from_f32(&[vec![0.0]]),
        })
    }

    async fn get_gradients(&self, _: Option<Duration>) -> io::Result<GradientsRes> {
        tokio::time::sleep(self.delay).await;

        if self.fail_gradients {
            return Err(io::Error::new(io::ErrorKind::TimedOut, "scripted"));
        }

        Ok(GradientsRes {
            status: Status::ok(),
            gradients: Parameters::from_f32(&[self.gradient.clone()]),
        })
    }

    async fn get_contributions(
        &self,
        ins: ContributionsIns,
        _: Option<Duration>,
    ) -> io::Result<ContributionsRes> {
        let scores = match &self.scoring {
            Scoring::Fixed(scores) => scores.clone(),
            Scoring::FirstValue => ins
                .gradients
                .iter()
                .map(|g| {
                    g.to_f32()
                        .and_then(|t| t.first().and_then(|v| v.first().copied()))
                        .unwrap_or_default() as f64
                })
                .collect(),
            Scoring::Unreachable => {
                return Err(io::Error::new(io::ErrorKind::NotConnected, "scripted"));
            }
        };

        Ok(ContributionsRes {
            status: Status::ok(),
            scores,
        })
    }

    async fn reconnect(&self, _: ReconnectIns, _: Option<Duration>) -> io::Result<DisconnectRes> {
        Ok(DisconnectRes {
            status: Status::ok(),
            reason: "bye".into(),
        })
    }

    async fn identify(&self, _: Option<Duration>) -> io::Result<IdentifyRes> {
        Ok(IdentifyRes {
            status: Status::ok(),
            role: self.role,
        })
    }
}
